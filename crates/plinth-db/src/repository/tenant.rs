//! SurrealDB implementation of [`TenantRepository`].

use chrono::{DateTime, Utc};
use plinth_core::error::{PlinthError, PlinthResult};
use plinth_core::models::tenant::{
    CreateTenant, Plan, Tenant, TenantLimits, TenantStatus, UpdateTenant, database_name,
};
use plinth_core::repository::{PaginatedResult, Pagination, TenantRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use crate::error::DbError;

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct TenantRow {
    record_id: String,
    name: String,
    contact_name: String,
    contact_email: String,
    domain: String,
    subdomain: Option<String>,
    database_name: String,
    status: String,
    plan: String,
    max_users: Option<u32>,
    max_content_items: Option<u32>,
    max_taxonomy_items: Option<u32>,
    storage_quota_mb: u64,
    trial_ends_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Projection used by every read so rows always carry their id.
const SELECT_TENANT: &str = "SELECT meta::id(id) AS record_id, * FROM";

fn parse_status(s: &str) -> Result<TenantStatus, DbError> {
    match s {
        "provisioning" => Ok(TenantStatus::Provisioning),
        "active" => Ok(TenantStatus::Active),
        "inactive" => Ok(TenantStatus::Inactive),
        "suspended" => Ok(TenantStatus::Suspended),
        other => Err(DbError::Query(format!("unknown tenant status: {other}"))),
    }
}

fn parse_plan(s: &str) -> Result<Plan, DbError> {
    match s {
        "trial" => Ok(Plan::Trial),
        "basic" => Ok(Plan::Basic),
        "professional" => Ok(Plan::Professional),
        "enterprise" => Ok(Plan::Enterprise),
        other => Err(DbError::Query(format!("unknown plan: {other}"))),
    }
}

impl TenantRow {
    fn try_into_tenant(self) -> Result<Tenant, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::Query(format!("invalid UUID: {e}")))?;
        Ok(Tenant {
            id,
            name: self.name,
            contact_name: self.contact_name,
            contact_email: self.contact_email,
            domain: self.domain,
            subdomain: self.subdomain,
            database_name: self.database_name,
            status: parse_status(&self.status)?,
            plan: parse_plan(&self.plan)?,
            limits: TenantLimits {
                max_users: self.max_users,
                max_content_items: self.max_content_items,
                max_taxonomy_items: self.max_taxonomy_items,
                storage_quota_mb: self.storage_quota_mb,
            },
            trial_ends_at: self.trial_ends_at,
            last_activity: self.last_activity,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn first_tenant(rows: Vec<TenantRow>, id: &str) -> Result<Tenant, DbError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: id.to_string(),
        })?
        .try_into_tenant()
}

/// SurrealDB implementation of the tenant directory.
#[derive(Clone)]
pub struct SurrealTenantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTenantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find_one(&self, field: &'static str, value: &str) -> PlinthResult<Option<Tenant>> {
        let mut result = self
            .db
            .query(format!("{SELECT_TENANT} tenant WHERE {field} = $value LIMIT 1"))
            .bind(("value", value.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_tenant()?)),
            None => Ok(None),
        }
    }
}

impl<C: Connection> TenantRepository for SurrealTenantRepository<C> {
    async fn create(&self, input: CreateTenant) -> PlinthResult<Tenant> {
        if self
            .domain_taken(&input.domain, input.subdomain.as_deref(), None)
            .await?
        {
            return Err(PlinthError::DomainExists {
                domain: input.domain,
            });
        }

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let limits = input.plan.limits();
        let trial_ends_at = input.plan.trial_ends_at(Utc::now());
        let domain = input.domain.clone();

        let result = self
            .db
            .query(
                "CREATE type::record('tenant', $id) SET \
                 name = $name, contact_name = $contact_name, \
                 contact_email = $contact_email, \
                 domain = $domain, subdomain = $subdomain, \
                 database_name = $database_name, \
                 status = 'provisioning', plan = $plan, \
                 max_users = $max_users, \
                 max_content_items = $max_content_items, \
                 max_taxonomy_items = $max_taxonomy_items, \
                 storage_quota_mb = $storage_quota_mb, \
                 trial_ends_at = $trial_ends_at, \
                 last_activity = NONE; \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("contact_name", input.contact_name))
            .bind(("contact_email", input.contact_email))
            .bind(("domain", input.domain))
            .bind(("subdomain", input.subdomain))
            .bind(("database_name", database_name(&id)))
            .bind(("plan", input.plan.as_str().to_string()))
            .bind(("max_users", limits.max_users))
            .bind(("max_content_items", limits.max_content_items))
            .bind(("max_taxonomy_items", limits.max_taxonomy_items))
            .bind(("storage_quota_mb", limits.storage_quota_mb))
            .bind(("trial_ends_at", trial_ends_at))
            .await
            .map_err(DbError::from)?;

        // A concurrent insert can still trip the unique index.
        let mut result = result.check().map_err(|e| match DbError::from_statement(e) {
            DbError::Conflict { .. } => PlinthError::DomainExists {
                domain: domain.clone(),
            },
            other => other.into(),
        })?;

        // Statement 0 is the CREATE, statement 1 the SELECT with the id.
        let rows: Vec<TenantRow> = result.take(1).map_err(DbError::from)?;
        let tenant = first_tenant(rows, &id_str)?;
        info!(tenant_id = %tenant.id, domain = %tenant.domain, "Tenant record created");
        Ok(tenant)
    }

    async fn get_by_id(&self, id: Uuid) -> PlinthResult<Tenant> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(format!("{SELECT_TENANT} type::record('tenant', $id)"))
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_tenant(rows, &id_str)?)
    }

    async fn find_by_domain(&self, domain: &str) -> PlinthResult<Option<Tenant>> {
        self.find_one("domain", domain).await
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> PlinthResult<Option<Tenant>> {
        self.find_one("subdomain", subdomain).await
    }

    async fn domain_taken(
        &self,
        domain: &str,
        subdomain: Option<&str>,
        except: Option<Uuid>,
    ) -> PlinthResult<bool> {
        let clause = if subdomain.is_some() {
            "(domain = $domain OR subdomain = $subdomain)"
        } else {
            "domain = $domain"
        };

        let mut builder = self
            .db
            .query(format!(
                "SELECT count() AS total FROM tenant \
                 WHERE {clause} AND meta::id(id) != $except \
                 GROUP ALL"
            ))
            .bind(("domain", domain.to_string()))
            .bind(("except", except.map(|id| id.to_string()).unwrap_or_default()));
        if let Some(subdomain) = subdomain {
            builder = builder.bind(("subdomain", subdomain.to_string()));
        }
        let mut result = builder.await.map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }

    async fn update(&self, id: Uuid, input: UpdateTenant) -> PlinthResult<Tenant> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.contact_name.is_some() {
            sets.push("contact_name = $contact_name");
        }
        if input.contact_email.is_some() {
            sets.push("contact_email = $contact_email");
        }
        if input.plan.is_some() {
            sets.push(
                "plan = $plan, max_users = $max_users, \
                 max_content_items = $max_content_items, \
                 max_taxonomy_items = $max_taxonomy_items, \
                 storage_quota_mb = $storage_quota_mb, \
                 trial_ends_at = $trial_ends_at",
            );
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('tenant', $id) SET {}; \
             {SELECT_TENANT} type::record('tenant', $id);",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));

        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(contact_name) = input.contact_name {
            builder = builder.bind(("contact_name", contact_name));
        }
        if let Some(contact_email) = input.contact_email {
            builder = builder.bind(("contact_email", contact_email));
        }
        if let Some(plan) = input.plan {
            let limits = plan.limits();
            builder = builder
                .bind(("plan", plan.as_str().to_string()))
                .bind(("max_users", limits.max_users))
                .bind(("max_content_items", limits.max_content_items))
                .bind(("max_taxonomy_items", limits.max_taxonomy_items))
                .bind(("storage_quota_mb", limits.storage_quota_mb))
                .bind(("trial_ends_at", plan.trial_ends_at(Utc::now())));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result.check().map_err(DbError::from_statement)?;

        let rows: Vec<TenantRow> = result.take(1).map_err(DbError::from)?;
        Ok(first_tenant(rows, &id_str)?)
    }

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> PlinthResult<Tenant> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(format!(
                "UPDATE type::record('tenant', $id) SET status = $status, \
                 updated_at = time::now(); \
                 {SELECT_TENANT} type::record('tenant', $id);"
            ))
            .bind(("id", id_str.clone()))
            .bind(("status", status.as_str().to_string()))
            .await
            .map_err(DbError::from)?;
        let mut result = result.check().map_err(DbError::from_statement)?;

        let rows: Vec<TenantRow> = result.take(1).map_err(DbError::from)?;
        let tenant = first_tenant(rows, &id_str)?;
        info!(tenant_id = %id, status = %status, "Tenant status changed");
        Ok(tenant)
    }

    async fn set_domain(&self, id: Uuid, domain: &str) -> PlinthResult<Tenant> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(format!(
                "UPDATE type::record('tenant', $id) SET domain = $domain, \
                 updated_at = time::now(); \
                 {SELECT_TENANT} type::record('tenant', $id);"
            ))
            .bind(("id", id_str.clone()))
            .bind(("domain", domain.to_string()))
            .await
            .map_err(DbError::from)?;
        let mut result = result.check().map_err(|e| match DbError::from_statement(e) {
            DbError::Conflict { .. } => PlinthError::DomainExists {
                domain: domain.to_string(),
            },
            other => other.into(),
        })?;

        let rows: Vec<TenantRow> = result.take(1).map_err(DbError::from)?;
        Ok(first_tenant(rows, &id_str)?)
    }

    async fn touch_last_activity(&self, id: Uuid) -> PlinthResult<()> {
        self.db
            .query("UPDATE type::record('tenant', $id) SET last_activity = time::now()")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from_statement)?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> PlinthResult<()> {
        self.db
            .query("DELETE type::record('tenant', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from_statement)?;

        info!(tenant_id = %id, "Tenant record deleted");
        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> PlinthResult<PaginatedResult<Tenant>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM tenant GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(format!(
                "{SELECT_TENANT} tenant \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset"
            ))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_tenant())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
