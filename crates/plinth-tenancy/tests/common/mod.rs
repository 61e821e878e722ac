//! Shared fixtures: recording fakes for every external collaborator and
//! a database server with injectable faults.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use async_trait::async_trait;
use plinth_auth::AuthConfig;
use plinth_core::error::PlinthResult;
use plinth_core::models::tenant::{CreateTenant, Plan, Tenant, TenantStatus, UpdateTenant};
use plinth_core::repository::{PaginatedResult, Pagination, TenantRepository};
use plinth_db::repository::SurrealTenantRepository;
use plinth_db::{ConnectionRegistry, DatabaseServer, DbError, MemoryServer, RegistryConfig};
use plinth_tenancy::external::{
    CertificateAuthority, DnsProvider, DnsRecord, ReverseProxy, VerificationProbe,
};
use plinth_tenancy::{
    ChallengeMethod, Collaborators, Provisioner, TenancyConfig, TenancyError, TenancyResult,
    TenantResolver, VerifyConfig,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

pub const SERVER_IP: &str = "203.0.113.7";

pub type EventLog = Arc<Mutex<Vec<String>>>;

fn push(log: &EventLog, event: String) {
    log.lock().unwrap().push(event);
}

fn injected(what: &str) -> String {
    format!("injected {what} failure")
}

/// Park forever once `flag` is set, clearing it so only one call hangs.
/// Callers apply their side effect first, like a remote call whose
/// response never arrives.
async fn hang_once(flag: &AtomicBool) {
    if flag.swap(false, Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
}

/// Holds one call until released.
pub struct Gate {
    key: String,
    pub entered: Notify,
    pub release: Notify,
}

impl Gate {
    fn new(key: &str) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

pub struct FakeDns {
    log: EventLog,
    records: Mutex<Vec<DnsRecord>>,
    next_id: AtomicUsize,
    list_gate: Mutex<Option<Arc<Gate>>>,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    pub hang_create: AtomicBool,
}

impl FakeDns {
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::clone(log),
            records: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            list_gate: Mutex::new(None),
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            hang_create: AtomicBool::new(false),
        })
    }

    /// Hold the next `list_records` call for `name` until released.
    pub fn gate_list(&self, name: &str) -> Arc<Gate> {
        let gate = Gate::new(name);
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.name).collect()
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn list_records(&self, name: &str, record_type: &str) -> TenancyResult<Vec<DnsRecord>> {
        let gate = {
            let mut slot = self.list_gate.lock().unwrap();
            if slot.as_ref().is_some_and(|g| g.key == name) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name == name && r.record_type == record_type)
            .cloned()
            .collect())
    }

    async fn create_record(
        &self,
        record_type: &str,
        name: &str,
        content: &str,
        proxied: bool,
    ) -> TenancyResult<DnsRecord> {
        push(&self.log, format!("dns.create {name}"));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TenancyError::Dns(injected("dns create")));
        }
        let record = DnsRecord {
            id: format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            record_type: record_type.to_string(),
            name: name.to_string(),
            content: content.to_string(),
            proxied,
        };
        self.records.lock().unwrap().push(record.clone());
        hang_once(&self.hang_create).await;
        Ok(record)
    }

    async fn delete_record(&self, id: &str) -> TenancyResult<()> {
        let mut records = self.records.lock().unwrap();
        let name = records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.name.clone())
            .unwrap_or_default();
        push(&self.log, format!("dns.delete {name}"));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(TenancyError::Dns(injected("dns delete")));
        }
        records.retain(|r| r.id != id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Certificate authority
// ---------------------------------------------------------------------------

pub struct FakeAcme {
    log: EventLog,
    certificates: Mutex<HashSet<String>>,
    pub fail_issue: AtomicBool,
    pub hang_issue: AtomicBool,
    pub issued: AtomicUsize,
}

impl FakeAcme {
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::clone(log),
            certificates: Mutex::new(HashSet::new()),
            fail_issue: AtomicBool::new(false),
            hang_issue: AtomicBool::new(false),
            issued: AtomicUsize::new(0),
        })
    }

    pub fn certificates(&self) -> HashSet<String> {
        self.certificates.lock().unwrap().clone()
    }

    pub fn preinstall(&self, domain: &str) {
        self.certificates.lock().unwrap().insert(domain.to_string());
    }
}

#[async_trait]
impl CertificateAuthority for FakeAcme {
    async fn has_valid_certificate(&self, domain: &str) -> TenancyResult<bool> {
        Ok(self.certificates.lock().unwrap().contains(domain))
    }

    async fn issue_certificate(&self, domain: &str, _method: ChallengeMethod) -> TenancyResult<()> {
        push(&self.log, format!("acme.issue {domain}"));
        if self.fail_issue.load(Ordering::SeqCst) {
            return Err(TenancyError::Acme(injected("certificate")));
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.certificates.lock().unwrap().insert(domain.to_string());
        hang_once(&self.hang_issue).await;
        Ok(())
    }

    async fn revoke_certificate(&self, domain: &str) -> TenancyResult<()> {
        push(&self.log, format!("acme.revoke {domain}"));
        self.certificates.lock().unwrap().remove(domain);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reverse proxy
// ---------------------------------------------------------------------------

pub struct FakeProxy {
    log: EventLog,
    sites: Mutex<HashSet<String>>,
    pub fail_validate: AtomicBool,
    pub fail_reload: AtomicBool,
    pub hang_reload: AtomicBool,
}

impl FakeProxy {
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::clone(log),
            sites: Mutex::new(HashSet::new()),
            fail_validate: AtomicBool::new(false),
            fail_reload: AtomicBool::new(false),
            hang_reload: AtomicBool::new(false),
        })
    }

    pub fn sites(&self) -> HashSet<String> {
        self.sites.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReverseProxy for FakeProxy {
    async fn write_site(&self, domain: &str) -> TenancyResult<()> {
        push(&self.log, format!("proxy.write {domain}"));
        self.sites.lock().unwrap().insert(domain.to_string());
        Ok(())
    }

    async fn remove_site(&self, domain: &str) -> TenancyResult<()> {
        push(&self.log, format!("proxy.remove {domain}"));
        self.sites.lock().unwrap().remove(domain);
        Ok(())
    }

    async fn validate(&self) -> TenancyResult<()> {
        push(&self.log, "proxy.validate".to_string());
        if self.fail_validate.load(Ordering::SeqCst) {
            return Err(TenancyError::ProxyConfigInvalid(injected("validate")));
        }
        Ok(())
    }

    async fn reload(&self) -> TenancyResult<()> {
        push(&self.log, "proxy.reload".to_string());
        hang_once(&self.hang_reload).await;
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(TenancyError::Proxy(injected("reload")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Verification probe
// ---------------------------------------------------------------------------

pub struct FakeProbe {
    log: EventLog,
    pub fail: AtomicBool,
    pub hang: AtomicBool,
}

impl FakeProbe {
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::clone(log),
            fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl VerificationProbe for FakeProbe {
    async fn check(&self, domain: &str) -> TenancyResult<()> {
        push(&self.log, format!("probe.check {domain}"));
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TenancyError::Verification(injected("probe")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Database server with faults
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FaultyServer {
    inner: MemoryServer,
    pub fail_create: AtomicBool,
    pub fail_connect: AtomicBool,
}

impl FaultyServer {
    pub async fn databases(&self) -> Vec<String> {
        self.inner.databases().await
    }
}

impl DatabaseServer for FaultyServer {
    type Conn = Db;

    async fn create_database(&self, name: &str) -> Result<(), DbError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DbError::Unreachable(injected("create database")));
        }
        self.inner.create_database(name).await
    }

    async fn drop_database(&self, name: &str) -> Result<(), DbError> {
        self.inner.drop_database(name).await
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DbError> {
        self.inner.database_exists(name).await
    }

    async fn connect(&self, name: &str) -> Result<Surreal<Db>, DbError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::Unreachable(injected("connect")));
        }
        self.inner.connect(name).await
    }
}

// ---------------------------------------------------------------------------
// Directory whose insert can stall
// ---------------------------------------------------------------------------

/// Delegates to a real directory; `create` can be made to hang after
/// the row is written.
pub struct StallingDirectory {
    pub inner: Arc<Tenants>,
    pub hang_create: AtomicBool,
}

impl TenantRepository for StallingDirectory {
    async fn create(&self, input: CreateTenant) -> PlinthResult<Tenant> {
        let tenant = self.inner.create(input).await?;
        hang_once(&self.hang_create).await;
        Ok(tenant)
    }

    async fn get_by_id(&self, id: Uuid) -> PlinthResult<Tenant> {
        self.inner.get_by_id(id).await
    }

    async fn find_by_domain(&self, domain: &str) -> PlinthResult<Option<Tenant>> {
        self.inner.find_by_domain(domain).await
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> PlinthResult<Option<Tenant>> {
        self.inner.find_by_subdomain(subdomain).await
    }

    async fn domain_taken(
        &self,
        domain: &str,
        subdomain: Option<&str>,
        except: Option<Uuid>,
    ) -> PlinthResult<bool> {
        self.inner.domain_taken(domain, subdomain, except).await
    }

    async fn update(&self, id: Uuid, input: UpdateTenant) -> PlinthResult<Tenant> {
        self.inner.update(id, input).await
    }

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> PlinthResult<Tenant> {
        self.inner.set_status(id, status).await
    }

    async fn set_domain(&self, id: Uuid, domain: &str) -> PlinthResult<Tenant> {
        self.inner.set_domain(id, domain).await
    }

    async fn touch_last_activity(&self, id: Uuid) -> PlinthResult<()> {
        self.inner.touch_last_activity(id).await
    }

    async fn delete(&self, id: Uuid) -> PlinthResult<()> {
        self.inner.delete(id).await
    }

    async fn list(&self, pagination: Pagination) -> PlinthResult<PaginatedResult<Tenant>> {
        self.inner.list(pagination).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub type Tenants = SurrealTenantRepository<Db>;

pub struct Harness {
    pub directory: Surreal<Db>,
    pub tenants: Arc<Tenants>,
    pub server: Arc<FaultyServer>,
    pub registry: Arc<ConnectionRegistry<FaultyServer>>,
    pub log: EventLog,
    pub dns: Arc<FakeDns>,
    pub acme: Arc<FakeAcme>,
    pub proxy: Arc<FakeProxy>,
    pub probe: Arc<FakeProbe>,
    pub provisioner: Provisioner<Tenants, FaultyServer>,
    pub resolver: TenantResolver<Tenants>,
}

pub fn test_config() -> TenancyConfig {
    TenancyConfig {
        server_ip: SERVER_IP.into(),
        step_timeout_secs: 5,
        verify: VerifyConfig {
            enabled: true,
            grace_delay_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: TenancyConfig) -> Self {
        let directory = Surreal::new::<Mem>(()).await.unwrap();
        directory.use_ns("test").use_db("directory").await.unwrap();
        plinth_db::run_migrations(&directory).await.unwrap();

        let tenants = Arc::new(SurrealTenantRepository::new(directory.clone()));
        let server = Arc::new(FaultyServer::default());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&server),
            RegistryConfig::default(),
        ));

        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let dns = FakeDns::new(&log);
        let acme = FakeAcme::new(&log);
        let proxy = FakeProxy::new(&log);
        let probe = FakeProbe::new(&log);

        let collaborators = Collaborators {
            dns: Some(Arc::clone(&dns) as Arc<dyn DnsProvider>),
            acme: Some(Arc::clone(&acme) as Arc<dyn CertificateAuthority>),
            proxy: Some(Arc::clone(&proxy) as Arc<dyn ReverseProxy>),
            probe: Some(Arc::clone(&probe) as Arc<dyn VerificationProbe>),
        };

        let provisioner = Provisioner::new(
            Arc::clone(&tenants),
            Arc::clone(&registry),
            collaborators,
            config,
            AuthConfig::default(),
        );
        let resolver = TenantResolver::new(Arc::clone(&tenants));

        Self {
            directory,
            tenants,
            server,
            registry,
            log,
            dns,
            acme,
            proxy,
            probe,
            provisioner,
            resolver,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.log.lock().unwrap().clear();
    }

    pub async fn tenant_count(&self) -> u64 {
        self.tenants.list(Pagination::default()).await.unwrap().total
    }

    /// Assert that nothing from any provisioning attempt remains.
    pub async fn assert_nothing_left(&self) {
        assert_eq!(self.tenant_count().await, 0, "tenant row left behind");
        assert!(self.server.databases().await.is_empty(), "database left behind");
        assert!(self.dns.records().is_empty(), "DNS record left behind");
        assert!(self.acme.certificates().is_empty(), "certificate left behind");
        assert!(self.proxy.sites().is_empty(), "proxy fragment left behind");
        assert!(self.registry.is_empty(), "registry entry left behind");
    }
}

pub fn request(domain: &str) -> CreateTenant {
    CreateTenant {
        name: format!("Tenant {domain}"),
        contact_name: "Ann Admin".into(),
        contact_email: "ann@example.com".into(),
        domain: domain.into(),
        subdomain: None,
        plan: Plan::Trial,
    }
}
