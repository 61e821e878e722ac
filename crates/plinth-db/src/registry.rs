//! Process-local registry of live per-tenant database handles.
//!
//! Entries are created lazily on first [`ConnectionRegistry::acquire`]
//! and keyed by tenant id. Establishment for one tenant runs at most
//! once at a time and never blocks other tenants. A failed attempt
//! leaves nothing cached, so the next caller starts from scratch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use plinth_core::models::tenant::database_name;
use serde::Deserialize;
use surrealdb::{Connection, Surreal};
use tokio::sync::{OnceCell, Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::DatabaseServer;
use crate::error::DbError;
use crate::repository::SurrealUserRepository;
use crate::schema::ensure_tenant_schema;

/// Bounds applied to every tenant handle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Concurrent sessions allowed per tenant (default: 5).
    pub max_connections: usize,
    /// Wait for a free session before failing (default: 5 s).
    pub acquire_timeout_secs: u64,
    /// Budget for opening a handle and initializing its schema (default: 10 s).
    pub connect_timeout_secs: u64,
    /// Unused handles older than this are evicted (default: 900 s).
    pub idle_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 5,
            connect_timeout_secs: 10,
            idle_timeout_secs: 900,
        }
    }
}

impl RegistryConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// A live handle to one tenant's database, with its schema-bound
/// accessors built once alongside it.
pub struct TenantConnection<C: Connection> {
    tenant_id: Uuid,
    database: String,
    db: Surreal<C>,
    users: SurrealUserRepository<C>,
    permits: Semaphore,
    acquire_timeout: Duration,
    opened_at: Instant,
    /// Milliseconds after `opened_at` of the last use.
    last_used_ms: AtomicU64,
}

impl<C: Connection> TenantConnection<C> {
    fn new(tenant_id: Uuid, database: String, db: Surreal<C>, config: &RegistryConfig) -> Self {
        Self {
            tenant_id,
            database,
            users: SurrealUserRepository::new(db.clone()),
            db,
            permits: Semaphore::new(config.max_connections.max(1)),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            opened_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    /// Check out a session, waiting at most the configured acquire timeout.
    pub async fn session(&self) -> Result<TenantSession<'_, C>, DbError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| DbError::Timeout {
                database: self.database.clone(),
                secs: self.acquire_timeout.as_secs(),
            })?
            .map_err(|e| DbError::Unreachable(e.to_string()))?;
        self.touch();
        Ok(TenantSession {
            conn: self,
            _permit: permit,
        })
    }

    /// Sessions currently available.
    pub fn available_sessions(&self) -> usize {
        self.permits.available_permits()
    }

    /// Time since this handle was last used.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last)
    }

    fn touch(&self) {
        let now = u64::try_from(self.opened_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_used_ms.store(now, Ordering::Relaxed);
    }
}

/// A checked-out session on a tenant database. The slot is returned
/// when the session is dropped.
pub struct TenantSession<'a, C: Connection> {
    conn: &'a TenantConnection<C>,
    _permit: SemaphorePermit<'a>,
}

impl<C: Connection> TenantSession<'_, C> {
    pub fn db(&self) -> &Surreal<C> {
        &self.conn.db
    }

    pub fn users(&self) -> &SurrealUserRepository<C> {
        &self.conn.users
    }
}

type Entry<C> = Arc<OnceCell<Arc<TenantConnection<C>>>>;

/// Cache of tenant handles, owned explicitly and injected where needed.
pub struct ConnectionRegistry<S: DatabaseServer> {
    server: Arc<S>,
    config: RegistryConfig,
    entries: DashMap<Uuid, Entry<S::Conn>>,
}

impl<S: DatabaseServer> ConnectionRegistry<S> {
    pub fn new(server: Arc<S>, config: RegistryConfig) -> Self {
        Self {
            server,
            config,
            entries: DashMap::new(),
        }
    }

    pub fn server(&self) -> &Arc<S> {
        &self.server
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Return the cached handle for a tenant, establishing it if needed.
    ///
    /// Concurrent callers for the same tenant share a single
    /// establishment; callers for other tenants proceed independently.
    pub async fn acquire(&self, tenant_id: Uuid) -> Result<Arc<TenantConnection<S::Conn>>, DbError> {
        // Clone the cell out so no shard lock is held across the await.
        let cell = Arc::clone(self.entries.entry(tenant_id).or_default().value());

        if let Some(conn) = cell.get() {
            debug!(tenant_id = %tenant_id, "Tenant connection cache hit");
            conn.touch();
            return Ok(Arc::clone(conn));
        }

        let conn = cell
            .get_or_try_init(|| self.establish_bounded(tenant_id))
            .await
            .inspect_err(|e| {
                warn!(tenant_id = %tenant_id, error = %e, "Tenant connection failed");
            })?;
        conn.touch();
        Ok(Arc::clone(conn))
    }

    async fn establish_bounded(
        &self,
        tenant_id: Uuid,
    ) -> Result<Arc<TenantConnection<S::Conn>>, DbError> {
        let budget = Duration::from_secs(self.config.connect_timeout_secs);
        tokio::time::timeout(budget, self.establish(tenant_id))
            .await
            .map_err(|_| DbError::Timeout {
                database: database_name(&tenant_id),
                secs: budget.as_secs(),
            })?
    }

    async fn establish(&self, tenant_id: Uuid) -> Result<Arc<TenantConnection<S::Conn>>, DbError> {
        let database = database_name(&tenant_id);
        info!(tenant_id = %tenant_id, database = %database, "Opening tenant connection");

        let db = self.server.connect(&database).await?;
        ensure_tenant_schema(&db).await?;

        info!(tenant_id = %tenant_id, "Tenant connection ready");
        Ok(Arc::new(TenantConnection::new(
            tenant_id,
            database,
            db,
            &self.config,
        )))
    }

    /// Drop the cached handle for a tenant. Returns whether one existed.
    pub fn close(&self, tenant_id: Uuid) -> bool {
        let existed = self
            .entries
            .remove(&tenant_id)
            .is_some_and(|(_, cell)| cell.initialized());
        if existed {
            info!(tenant_id = %tenant_id, "Tenant connection closed");
        }
        existed
    }

    /// Close every handle unused for longer than the idle timeout.
    ///
    /// Entries still being established are left alone.
    pub fn evict_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut evicted = 0;
        self.entries.retain(|tenant_id, cell| {
            let stale = cell.get().is_some_and(|c| c.idle_for() >= idle_timeout);
            if stale {
                debug!(tenant_id = %tenant_id, "Evicting idle tenant connection");
                evicted += 1;
            }
            !stale
        });
        if evicted > 0 {
            info!(evicted, "Evicted idle tenant connections");
        }
        evicted
    }

    /// Whether an established handle is cached for the tenant.
    pub fn contains(&self, tenant_id: Uuid) -> bool {
        self.entries
            .get(&tenant_id)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of established handles.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
