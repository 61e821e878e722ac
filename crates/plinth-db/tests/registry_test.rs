//! Integration tests for the per-tenant connection registry.

use std::sync::Arc;
use std::time::Duration;

use plinth_core::models::tenant::database_name;
use plinth_core::models::user::{CreateUser, UserRole};
use plinth_core::repository::UserRepository;
use plinth_db::{ConnectionRegistry, DatabaseServer, DbError, MemoryServer, RegistryConfig};
use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use tokio::sync::Notify;
use uuid::Uuid;

async fn setup(config: RegistryConfig) -> (Arc<MemoryServer>, Arc<ConnectionRegistry<MemoryServer>>) {
    let server = Arc::new(MemoryServer::default());
    let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&server), config));
    (server, registry)
}

async fn new_tenant(server: &MemoryServer) -> Uuid {
    let id = Uuid::new_v4();
    server.create_database(&database_name(&id)).await.unwrap();
    id
}

#[tokio::test]
async fn concurrent_acquires_share_one_connection() {
    let (server, registry) = setup(RegistryConfig::default()).await;
    let tenant_id = new_tenant(&server).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.acquire(tenant_id).await })
        })
        .collect();

    let mut conns = Vec::new();
    for handle in handles {
        conns.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(server.connect_count(), 1, "exactly one connection should be opened");
    assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
    assert_eq!(registry.len(), 1);
}

/// Memory server whose `connect` for one database waits to be released.
#[derive(Default)]
struct StalledServer {
    inner: MemoryServer,
    stalled: String,
    entered: Notify,
    release: Notify,
}

impl DatabaseServer for StalledServer {
    type Conn = Db;

    async fn create_database(&self, name: &str) -> Result<(), DbError> {
        self.inner.create_database(name).await
    }

    async fn drop_database(&self, name: &str) -> Result<(), DbError> {
        self.inner.drop_database(name).await
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DbError> {
        self.inner.database_exists(name).await
    }

    async fn connect(&self, name: &str) -> Result<Surreal<Db>, DbError> {
        if name == self.stalled {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.connect(name).await
    }
}

#[tokio::test]
async fn slow_establishment_does_not_block_other_tenants() {
    let slow = Uuid::new_v4();
    let fast = Uuid::new_v4();
    let server = Arc::new(StalledServer {
        stalled: database_name(&slow),
        ..Default::default()
    });
    for id in [slow, fast] {
        server.create_database(&database_name(&id)).await.unwrap();
    }
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::clone(&server),
        RegistryConfig::default(),
    ));

    let pending = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.acquire(slow).await })
    };
    server.entered.notified().await;

    let conn = tokio::time::timeout(Duration::from_secs(5), registry.acquire(fast))
        .await
        .expect("acquire for another tenant stalled behind a slow connect")
        .unwrap();
    assert_eq!(conn.tenant_id(), fast);
    assert!(!pending.is_finished());
    assert!(!registry.contains(slow));

    server.release.notify_one();
    pending.await.unwrap().unwrap();
    assert!(registry.contains(slow));
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn acquire_initializes_tenant_schema() {
    let (server, registry) = setup(RegistryConfig::default()).await;
    let tenant_id = new_tenant(&server).await;

    let conn = registry.acquire(tenant_id).await.unwrap();
    assert_eq!(conn.tenant_id(), tenant_id);
    assert_eq!(conn.database_name(), database_name(&tenant_id));

    // The user table only exists once the schema has been applied.
    let session = conn.session().await.unwrap();
    assert_eq!(session.users().count(tenant_id).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_database_fails_and_is_not_cached() {
    let (server, registry) = setup(RegistryConfig::default()).await;
    let tenant_id = Uuid::new_v4();

    let result = registry.acquire(tenant_id).await;
    assert!(matches!(result, Err(DbError::UnknownDatabase(_))));
    assert!(!registry.contains(tenant_id));
    assert!(registry.is_empty());

    // Once the database exists the next acquire starts fresh and succeeds.
    server
        .create_database(&database_name(&tenant_id))
        .await
        .unwrap();
    registry.acquire(tenant_id).await.unwrap();
    assert!(registry.contains(tenant_id));
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (server, registry) = setup(RegistryConfig::default()).await;
    let a = new_tenant(&server).await;
    let b = new_tenant(&server).await;

    let conn_a = registry.acquire(a).await.unwrap();
    conn_a
        .session()
        .await
        .unwrap()
        .users()
        .create(CreateUser {
            tenant_id: a,
            username: "admin".into(),
            email: "admin@a.example.com".into(),
            password_hash: "hash".into(),
            role: UserRole::Admin,
            must_change_password: true,
        })
        .await
        .unwrap();

    let conn_b = registry.acquire(b).await.unwrap();
    assert!(!Arc::ptr_eq(&conn_a, &conn_b));

    let session_b = conn_b.session().await.unwrap();
    let mut result = session_b.db().query("SELECT * FROM user").await.unwrap();
    let rows: Vec<surrealdb_types::Value> = result.take(0).unwrap();
    assert!(rows.is_empty(), "tenant B must not see tenant A's users");
}

#[tokio::test]
async fn close_drops_the_cached_handle() {
    let (server, registry) = setup(RegistryConfig::default()).await;
    let tenant_id = new_tenant(&server).await;

    registry.acquire(tenant_id).await.unwrap();
    assert!(registry.close(tenant_id));
    assert!(!registry.contains(tenant_id));
    assert!(!registry.close(tenant_id));

    registry.acquire(tenant_id).await.unwrap();
    assert_eq!(server.connect_count(), 2);
}

#[tokio::test]
async fn evict_idle_removes_stale_handles() {
    let config = RegistryConfig {
        idle_timeout_secs: 0,
        ..Default::default()
    };
    let (server, registry) = setup(config).await;
    let a = new_tenant(&server).await;
    let b = new_tenant(&server).await;

    registry.acquire(a).await.unwrap();
    registry.acquire(b).await.unwrap();
    assert_eq!(registry.len(), 2);

    assert_eq!(registry.evict_idle(), 2);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn evict_idle_keeps_recent_handles() {
    let (server, registry) = setup(RegistryConfig::default()).await;
    let tenant_id = new_tenant(&server).await;

    registry.acquire(tenant_id).await.unwrap();
    assert_eq!(registry.evict_idle(), 0);
    assert!(registry.contains(tenant_id));
}

#[tokio::test]
async fn session_checkout_times_out_when_exhausted() {
    let config = RegistryConfig {
        max_connections: 1,
        acquire_timeout_secs: 0,
        ..Default::default()
    };
    let (server, registry) = setup(config).await;
    let tenant_id = new_tenant(&server).await;

    let conn = registry.acquire(tenant_id).await.unwrap();
    let held = conn.session().await.unwrap();
    assert_eq!(conn.available_sessions(), 0);

    let result = conn.session().await;
    assert!(matches!(result, Err(DbError::Timeout { .. })));

    drop(held);
    assert_eq!(conn.available_sessions(), 1);
    conn.session().await.unwrap();
}
