//! Schema definitions and migration runner for SurrealDB.
//!
//! Two schemas exist: the tenant directory (one shared database) and
//! the content schema applied to every tenant's own database. All
//! table definitions use SCHEMAFULL mode, and every DEFINE statement
//! carries `IF NOT EXISTS` so applying a schema twice is a no-op.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, info};

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static DIRECTORY_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "tenant_directory",
    sql: DIRECTORY_SCHEMA_V1,
}];

static TENANT_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "tenant_content",
    sql: TENANT_SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Directory schema v1
// -----------------------------------------------------------------------

const DIRECTORY_SCHEMA_V1: &str = "\
-- =======================================================================
-- Tenants
-- =======================================================================
DEFINE TABLE IF NOT EXISTS tenant SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS name ON TABLE tenant TYPE string;
DEFINE FIELD IF NOT EXISTS contact_name ON TABLE tenant TYPE string;
DEFINE FIELD IF NOT EXISTS contact_email ON TABLE tenant TYPE string;
DEFINE FIELD IF NOT EXISTS domain ON TABLE tenant TYPE string;
DEFINE FIELD IF NOT EXISTS subdomain ON TABLE tenant TYPE option<string>;
DEFINE FIELD IF NOT EXISTS database_name ON TABLE tenant TYPE string;
DEFINE FIELD IF NOT EXISTS status ON TABLE tenant TYPE string \
    ASSERT $value IN ['provisioning', 'active', 'inactive', 'suspended'];
DEFINE FIELD IF NOT EXISTS plan ON TABLE tenant TYPE string \
    ASSERT $value IN ['trial', 'basic', 'professional', 'enterprise'];
DEFINE FIELD IF NOT EXISTS max_users ON TABLE tenant TYPE option<int>;
DEFINE FIELD IF NOT EXISTS max_content_items ON TABLE tenant \
    TYPE option<int>;
DEFINE FIELD IF NOT EXISTS max_taxonomy_items ON TABLE tenant \
    TYPE option<int>;
DEFINE FIELD IF NOT EXISTS storage_quota_mb ON TABLE tenant TYPE int;
DEFINE FIELD IF NOT EXISTS trial_ends_at ON TABLE tenant \
    TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS last_activity ON TABLE tenant \
    TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_tenant_domain ON TABLE tenant \
    COLUMNS domain UNIQUE;
DEFINE INDEX IF NOT EXISTS idx_tenant_subdomain ON TABLE tenant \
    COLUMNS subdomain;
DEFINE INDEX IF NOT EXISTS idx_tenant_database ON TABLE tenant \
    COLUMNS database_name UNIQUE;
";

// -----------------------------------------------------------------------
// Tenant content schema v1
// -----------------------------------------------------------------------

const TENANT_SCHEMA_V1: &str = "\
-- =======================================================================
-- Users
-- =======================================================================
DEFINE TABLE IF NOT EXISTS user SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS tenant_id ON TABLE user TYPE string;
DEFINE FIELD IF NOT EXISTS username ON TABLE user TYPE string;
DEFINE FIELD IF NOT EXISTS email ON TABLE user TYPE string;
DEFINE FIELD IF NOT EXISTS password_hash ON TABLE user TYPE string;
DEFINE FIELD IF NOT EXISTS role ON TABLE user TYPE string \
    ASSERT $value IN ['admin', 'editor', 'author'];
DEFINE FIELD IF NOT EXISTS must_change_password ON TABLE user TYPE bool \
    DEFAULT false;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_user_username ON TABLE user \
    COLUMNS username UNIQUE;
DEFINE INDEX IF NOT EXISTS idx_user_email ON TABLE user \
    COLUMNS email UNIQUE;

-- =======================================================================
-- Categories (hierarchical)
-- =======================================================================
DEFINE TABLE IF NOT EXISTS category SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS name ON TABLE category TYPE string;
DEFINE FIELD IF NOT EXISTS slug ON TABLE category TYPE string;
DEFINE FIELD IF NOT EXISTS description ON TABLE category \
    TYPE option<string>;
DEFINE FIELD IF NOT EXISTS parent_id ON TABLE category \
    TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE category TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON TABLE category TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_category_slug ON TABLE category \
    COLUMNS slug UNIQUE;

-- =======================================================================
-- Tags
-- =======================================================================
DEFINE TABLE IF NOT EXISTS tag SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS name ON TABLE tag TYPE string;
DEFINE FIELD IF NOT EXISTS slug ON TABLE tag TYPE string;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE tag TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_tag_slug ON TABLE tag COLUMNS slug UNIQUE;

-- =======================================================================
-- Articles
-- =======================================================================
DEFINE TABLE IF NOT EXISTS article SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS title ON TABLE article TYPE string;
DEFINE FIELD IF NOT EXISTS slug ON TABLE article TYPE string;
DEFINE FIELD IF NOT EXISTS summary ON TABLE article TYPE option<string>;
DEFINE FIELD IF NOT EXISTS body ON TABLE article TYPE string;
DEFINE FIELD IF NOT EXISTS status ON TABLE article TYPE string \
    ASSERT $value IN ['draft', 'published', 'archived'];
DEFINE FIELD IF NOT EXISTS author_id ON TABLE article TYPE string;
DEFINE FIELD IF NOT EXISTS category_id ON TABLE article \
    TYPE option<string>;
DEFINE FIELD IF NOT EXISTS tags ON TABLE article TYPE array DEFAULT [];
DEFINE FIELD IF NOT EXISTS tags.* ON TABLE article TYPE string;
DEFINE FIELD IF NOT EXISTS cover_image ON TABLE article \
    TYPE option<string>;
DEFINE FIELD IF NOT EXISTS published_at ON TABLE article \
    TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE article TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON TABLE article TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_article_slug ON TABLE article \
    COLUMNS slug UNIQUE;
DEFINE INDEX IF NOT EXISTS idx_article_status_published ON TABLE article \
    COLUMNS status, published_at;
DEFINE INDEX IF NOT EXISTS idx_article_category ON TABLE article \
    COLUMNS category_id;
DEFINE INDEX IF NOT EXISTS idx_article_author ON TABLE article \
    COLUMNS author_id;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending tenant-directory migrations.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    apply(db, DIRECTORY_MIGRATIONS).await
}

/// Ensure a tenant database carries the content schema.
///
/// Safe to call against a fresh or an already-initialized database:
/// applied versions are skipped and every statement is idempotent.
pub async fn ensure_tenant_schema<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    apply(db, TENANT_MIGRATIONS).await
}

async fn apply<C: Connection>(db: &Surreal<C>, migrations: &[Migration]) -> Result<(), DbError> {
    // Ensure migration tracking table exists (idempotent).
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    // Determine current schema version.
    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in migrations {
        if migration.version <= current_version {
            debug!(version = migration.version, "Migration already applied");
            continue;
        }

        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "Migration v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        // Record the applied migration.
        db.query(
            "CREATE _migration SET version = $version, \
             name = $name",
        )
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .await?
        .check()
        .map_err(|e| {
            DbError::Migration(format!(
                "Failed to record migration v{}: {}",
                migration.version, e,
            ))
        })?;

        info!(
            version = migration.version,
            "Migration applied successfully"
        );
    }

    Ok(())
}
