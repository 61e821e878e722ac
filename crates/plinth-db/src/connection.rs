//! SurrealDB connection management.
//!
//! Two kinds of connection exist: the directory connection held by
//! [`DbManager`], and per-tenant connections opened through a
//! [`DatabaseServer`]. A database server maps onto one SurrealDB
//! namespace; every tenant database is a SurrealDB database inside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use surrealdb::engine::local::{Db, Mem};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::{Connection, Surreal};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::DbError;

/// Configuration for connecting to SurrealDB.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// WebSocket address (e.g., `127.0.0.1:8000`).
    pub url: String,
    /// SurrealDB namespace holding the directory and all tenant databases.
    pub namespace: String,
    /// Database holding the tenant directory.
    pub database: String,
    /// Root username for authentication.
    pub username: String,
    /// Root password for authentication.
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "plinth".into(),
            database: "directory".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

/// Manages the connection to the tenant directory.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Connect to SurrealDB using the provided configuration.
    ///
    /// Authenticates as root, selects the configured namespace and
    /// directory database, and returns a ready-to-use manager.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to tenant directory"
        );

        let db = open_remote(config).await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        info!("Successfully connected to tenant directory");

        Ok(Self { db })
    }

    /// Returns a reference to the underlying SurrealDB client.
    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}

async fn open_remote(config: &DbConfig) -> Result<Surreal<Client>, DbError> {
    let db = Surreal::new::<Ws>(&config.url)
        .await
        .map_err(|e| DbError::Unreachable(format!("{}: {e}", config.url)))?;

    db.signin(Root {
        username: config.username.clone(),
        password: config.password.clone(),
    })
    .await
    .map_err(|e| DbError::Unreachable(format!("authentication failed: {e}")))?;

    Ok(db)
}

/// Reject names that are unsafe to splice into DDL.
///
/// SurrealDB cannot bind identifiers as parameters, so database names
/// are embedded literally and must stay within `[a-z0-9_]`.
pub fn validate_database_name(name: &str) -> Result<(), DbError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidName(name.to_string()))
    }
}

/// Control surface of the server hosting tenant databases.
///
/// Implementations must be cheap to share; the registry and the
/// provisioning orchestrator hold the same instance.
pub trait DatabaseServer: Send + Sync + 'static {
    type Conn: Connection;

    /// Create a database. Succeeds if it already exists.
    fn create_database(&self, name: &str) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Drop a database. Succeeds if it does not exist.
    fn drop_database(&self, name: &str) -> impl Future<Output = Result<(), DbError>> + Send;

    fn database_exists(&self, name: &str) -> impl Future<Output = Result<bool, DbError>> + Send;

    /// Open a new client bound to an existing database.
    ///
    /// Fails with [`DbError::UnknownDatabase`] when the database has not
    /// been created and [`DbError::Unreachable`] on transport or
    /// authentication failures.
    fn connect(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Surreal<Self::Conn>, DbError>> + Send;
}

// -----------------------------------------------------------------------
// Remote server (WebSocket)
// -----------------------------------------------------------------------

/// A SurrealDB server reached over WebSocket.
///
/// Holds a root-authenticated admin client scoped to the namespace for
/// DDL; tenant connections are opened separately so each tenant gets
/// its own session.
pub struct RemoteServer {
    config: DbConfig,
    admin: Surreal<Client>,
}

impl RemoteServer {
    pub async fn connect(config: DbConfig) -> Result<Self, DbError> {
        let admin = open_remote(&config).await?;
        admin.use_ns(&config.namespace).await?;
        info!(url = %config.url, namespace = %config.namespace, "Connected to database server");
        Ok(Self { config, admin })
    }
}

impl DatabaseServer for RemoteServer {
    type Conn = Client;

    async fn create_database(&self, name: &str) -> Result<(), DbError> {
        validate_database_name(name)?;
        self.admin
            .query(format!("DEFINE DATABASE IF NOT EXISTS {name}"))
            .await?
            .check()
            .map_err(DbError::from_statement)?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DbError> {
        validate_database_name(name)?;
        self.admin
            .query(format!("REMOVE DATABASE IF EXISTS {name}"))
            .await?
            .check()
            .map_err(DbError::from_statement)?;
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DbError> {
        let mut result = self.admin.query("INFO FOR NS").await?;
        let info: Option<serde_json::Value> = result.take(0)?;
        Ok(info
            .as_ref()
            .and_then(|info| info.get("databases"))
            .and_then(|dbs| dbs.as_object())
            .is_some_and(|dbs| dbs.contains_key(name)))
    }

    async fn connect(&self, name: &str) -> Result<Surreal<Client>, DbError> {
        validate_database_name(name)?;
        if !self.database_exists(name).await? {
            return Err(DbError::UnknownDatabase(name.to_string()));
        }
        let db = open_remote(&self.config).await?;
        db.use_ns(&self.config.namespace)
            .use_db(name)
            .await
            .map_err(|e| DbError::Unreachable(e.to_string()))?;
        Ok(db)
    }
}

// -----------------------------------------------------------------------
// In-memory server
// -----------------------------------------------------------------------

/// A database server backed by the embedded in-memory engine.
///
/// Each database is a separate in-memory datastore, so dropping one
/// discards its contents. Used for tests and single-process demos.
pub struct MemoryServer {
    namespace: String,
    databases: Mutex<HashMap<String, Surreal<Db>>>,
    connects: AtomicUsize,
}

impl MemoryServer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            databases: Mutex::new(HashMap::new()),
            connects: AtomicUsize::new(0),
        }
    }

    /// Number of successful [`DatabaseServer::connect`] calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Names of all existing databases, sorted.
    pub async fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new("plinth")
    }
}

impl DatabaseServer for MemoryServer {
    type Conn = Db;

    async fn create_database(&self, name: &str) -> Result<(), DbError> {
        validate_database_name(name)?;
        let mut databases = self.databases.lock().await;
        if databases.contains_key(name) {
            return Ok(());
        }
        let db = Surreal::new::<Mem>(()).await?;
        db.use_ns(&self.namespace).use_db(name).await?;
        databases.insert(name.to_string(), db);
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DbError> {
        validate_database_name(name)?;
        self.databases.lock().await.remove(name);
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DbError> {
        Ok(self.databases.lock().await.contains_key(name))
    }

    async fn connect(&self, name: &str) -> Result<Surreal<Db>, DbError> {
        validate_database_name(name)?;
        let db = self
            .databases
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownDatabase(name.to_string()))?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_names_are_restricted() {
        assert!(validate_database_name("tenant_0a1b2c").is_ok());
        assert!(validate_database_name("").is_err());
        assert!(validate_database_name("tenant; REMOVE NAMESPACE plinth").is_err());
        assert!(validate_database_name("Tenant").is_err());
    }

    #[tokio::test]
    async fn memory_server_lifecycle() {
        let server = MemoryServer::default();
        assert!(!server.database_exists("tenant_a").await.unwrap());
        assert!(matches!(
            server.connect("tenant_a").await,
            Err(DbError::UnknownDatabase(_))
        ));

        server.create_database("tenant_a").await.unwrap();
        server.create_database("tenant_a").await.unwrap();
        assert!(server.database_exists("tenant_a").await.unwrap());
        server.connect("tenant_a").await.unwrap();
        assert_eq!(server.connect_count(), 1);

        server.drop_database("tenant_a").await.unwrap();
        server.drop_database("tenant_a").await.unwrap();
        assert!(server.databases().await.is_empty());
    }
}
