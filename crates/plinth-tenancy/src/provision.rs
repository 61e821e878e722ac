//! Tenant provisioning, deprovisioning and domain migration.
//!
//! Provisioning and migration run as sagas (see [`crate::saga`]): either
//! every step succeeds or everything already done is rolled back.
//! Deprovisioning and old-domain teardown are best-effort instead, each
//! sub-step running regardless of the others.

mod steps;

use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;
use plinth_auth::AuthConfig;
use plinth_core::error::{PlinthError, PlinthResult};
use plinth_core::models::tenant::{CreateTenant, Tenant, TenantStatus};
use plinth_core::repository::TenantRepository;
use plinth_db::{ConnectionRegistry, DatabaseServer};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use self::steps::{
    ActivateStep, AdminAccountStep, CertificateStep, DatabaseStep, DnsStep, ProxyStep,
    RecordStep, SchemaStep, StepContext, SwitchDomainStep, VerifyStep,
};
use crate::config::TenancyConfig;
use crate::error::{TenancyError, TenancyResult};
use crate::external::{
    CertbotClient, CertificateAuthority, CloudflareDns, DnsProvider, HttpProbe, NginxProxy,
    ReverseProxy, VerificationProbe,
};
use crate::host::{is_valid_label, normalize_host, validate_domain};
use crate::saga::{self, SagaFailure, Step};

/// External control planes used by the optional steps. A missing
/// collaborator skips its step.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub dns: Option<Arc<dyn DnsProvider>>,
    pub acme: Option<Arc<dyn CertificateAuthority>>,
    pub proxy: Option<Arc<dyn ReverseProxy>>,
    pub probe: Option<Arc<dyn VerificationProbe>>,
}

impl Collaborators {
    /// Build the production clients switched on in `config`.
    pub fn from_config(config: &TenancyConfig) -> TenancyResult<Self> {
        config.validate()?;
        let dns = match &config.dns {
            Some(dns) => Some(Arc::new(CloudflareDns::new(dns)?) as Arc<dyn DnsProvider>),
            None => None,
        };
        let acme = config.acme.enabled.then(|| {
            Arc::new(CertbotClient::new(config.acme.clone())) as Arc<dyn CertificateAuthority>
        });
        let proxy = config.proxy.enabled.then(|| {
            let tls_dir = config.acme.enabled.then(|| config.acme.cert_dir.clone());
            Arc::new(NginxProxy::new(
                config.proxy.clone(),
                tls_dir,
                config.step_timeout(),
            )) as Arc<dyn ReverseProxy>
        });
        let probe = if config.verify.enabled {
            Some(Arc::new(HttpProbe::new(&config.verify)?) as Arc<dyn VerificationProbe>)
        } else {
            None
        };
        Ok(Self {
            dns,
            acme,
            proxy,
            probe,
        })
    }
}

/// The one-time credential of a tenant's default administrator.
///
/// Only its hash is stored; this value is handed back exactly once.
#[derive(Clone, Serialize)]
pub struct AdminCredential {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredential")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub tenant: Tenant,
    pub admin: AdminCredential,
    /// Steps that ran, in order; skipped optional steps are absent.
    pub steps: Vec<&'static str>,
}

/// External resources removed for one domain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainTeardown {
    pub dns_removed: bool,
    pub proxy_removed: bool,
    pub certificate_revoked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeprovisionReport {
    pub tenant_id: Uuid,
    pub domain: String,
    pub database_dropped: bool,
    #[serde(flatten)]
    pub resources: DomainTeardown,
    pub record_deleted: bool,
    /// Sub-steps that failed; every other sub-step still ran.
    pub failures: Vec<String>,
}

impl DeprovisionReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub tenant: Tenant,
    pub old_domain: String,
    pub old_domain_teardown: DomainTeardown,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantStatusReport {
    pub tenant_id: Uuid,
    pub domain: String,
    pub directory_status: TenantStatus,
    pub database_reachable: bool,
    pub connection_cached: bool,
}

pub(crate) struct Shared<R, S: DatabaseServer> {
    pub tenants: Arc<R>,
    pub registry: Arc<ConnectionRegistry<S>>,
    pub collaborators: Collaborators,
    pub config: TenancyConfig,
    pub auth: AuthConfig,
}

/// Releases in-flight keys when dropped.
struct InFlightGuard {
    set: Arc<DashSet<String>>,
    keys: Vec<String>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            self.set.remove(key);
        }
    }
}

fn domain_key(domain: &str) -> String {
    format!("domain:{domain}")
}

fn tenant_key(id: Uuid) -> String {
    format!("tenant:{id}")
}

/// Drives tenant lifecycle operations against the directory, the
/// connection registry and the external collaborators.
pub struct Provisioner<R, S: DatabaseServer> {
    shared: Arc<Shared<R, S>>,
    in_flight: Arc<DashSet<String>>,
}

impl<R, S: DatabaseServer> Clone for Provisioner<R, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<R: TenantRepository + 'static, S: DatabaseServer> Provisioner<R, S> {
    pub fn new(
        tenants: Arc<R>,
        registry: Arc<ConnectionRegistry<S>>,
        collaborators: Collaborators,
        config: TenancyConfig,
        auth: AuthConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                tenants,
                registry,
                collaborators,
                config,
                auth,
            }),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn tenants(&self) -> &Arc<R> {
        &self.shared.tenants
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<S>> {
        &self.shared.registry
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.shared.config
    }

    /// Create a tenant and every resource it needs to serve traffic.
    ///
    /// On success the tenant is `active` and the administrator's
    /// temporary password is returned once. On failure nothing of the
    /// attempt remains, except where a cleanup action itself failed
    /// (reported through `cleanup_complete`).
    pub async fn provision(&self, input: CreateTenant) -> PlinthResult<ProvisionOutcome> {
        let input = normalize_request(input)?;
        let mut keys = vec![domain_key(&input.domain)];
        if let Some(subdomain) = &input.subdomain {
            keys.push(format!("subdomain:{subdomain}"));
        }
        let _guard = self.lock(keys)?;

        info!(domain = %input.domain, plan = %input.plan, "Provisioning tenant");
        let shared = &*self.shared;
        let mut ctx = StepContext::new(input.domain.clone(), None);
        let steps: Vec<Box<dyn Step<StepContext> + '_>> = vec![
            Box::new(RecordStep { shared, input }),
            Box::new(DatabaseStep(shared)),
            Box::new(SchemaStep(shared)),
            Box::new(DnsStep(shared)),
            Box::new(CertificateStep(shared)),
            Box::new(ProxyStep(shared)),
            Box::new(VerifyStep(shared)),
            Box::new(AdminAccountStep(shared)),
            Box::new(ActivateStep(shared)),
        ];

        let ran = saga::run(&steps, &mut ctx, shared.config.step_timeout())
            .await
            .map_err(step_failed)?;

        let (Some(tenant), Some(admin)) = (ctx.tenant.take(), ctx.admin.take()) else {
            return Err(PlinthError::Internal(
                "provisioning finished without a tenant or administrator".into(),
            ));
        };
        info!(tenant_id = %tenant.id, domain = %tenant.domain, "Tenant provisioned");
        Ok(ProvisionOutcome {
            tenant,
            admin,
            steps: ran,
        })
    }

    /// Run [`provision`](Self::provision) as a background task.
    pub fn spawn_provision(&self, input: CreateTenant) -> JoinHandle<PlinthResult<ProvisionOutcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.provision(input).await })
    }

    /// Tear down a tenant's database and external resources, then delete
    /// its directory record. Every sub-step is attempted.
    pub async fn deprovision(&self, tenant_id: Uuid) -> PlinthResult<DeprovisionReport> {
        let _tenant_guard = self.lock(vec![tenant_key(tenant_id)])?;
        let tenant = self.shared.tenants.get_by_id(tenant_id).await?;
        let _domain_guard = self.lock(vec![domain_key(&tenant.domain)])?;

        info!(tenant_id = %tenant_id, domain = %tenant.domain, "Deprovisioning tenant");
        let mut failures = Vec::new();

        // Stop serving before anything is removed.
        if tenant.status.can_transition_to(TenantStatus::Inactive) {
            let deactivated = self
                .shared
                .tenants
                .set_status(tenant_id, TenantStatus::Inactive)
                .await;
            if let Err(e) = deactivated {
                record_failure(&mut failures, "deactivate", e);
            }
        }
        self.shared.registry.close(tenant_id);

        let dropped = self
            .bounded(
                "drop_database",
                async {
                    self.shared
                        .registry
                        .server()
                        .drop_database(&tenant.database_name)
                        .await
                        .map_err(TenancyError::from)
                },
            )
            .await;
        let database_dropped = match dropped {
            Ok(()) => true,
            Err(e) => {
                record_failure(&mut failures, "database", e);
                false
            }
        };

        let resources = self.teardown_domain(&tenant.domain, &mut failures).await;

        let record_deleted = match self.shared.tenants.delete(tenant_id).await {
            Ok(()) => true,
            Err(e) => {
                record_failure(&mut failures, "record", e);
                false
            }
        };

        if failures.is_empty() {
            info!(tenant_id = %tenant_id, "Tenant deprovisioned");
        } else {
            warn!(tenant_id = %tenant_id, failures = failures.len(), "Tenant deprovisioned with failures");
        }
        Ok(DeprovisionReport {
            tenant_id,
            domain: tenant.domain,
            database_dropped,
            resources,
            record_deleted,
            failures,
        })
    }

    /// Move a tenant to `new_domain`.
    ///
    /// DNS, certificate and proxy routing for the new domain are brought
    /// up and verified before the directory record switches; only then
    /// is the old domain torn down.
    ///
    /// Both domains stay locked until teardown finishes, so the old one
    /// cannot be provisioned while its resources are being removed.
    pub async fn migrate_domain(
        &self,
        tenant_id: Uuid,
        new_domain: &str,
    ) -> PlinthResult<MigrationReport> {
        let new_domain = normalize_host(new_domain);
        validate_domain(&new_domain)?;
        let _tenant_guard = self.lock(vec![tenant_key(tenant_id)])?;

        let tenant = self.shared.tenants.get_by_id(tenant_id).await?;
        if tenant.domain == new_domain {
            return Err(PlinthError::validation(format!(
                "tenant already uses domain '{new_domain}'"
            )));
        }
        let _domain_guard = self.lock(vec![domain_key(&tenant.domain), domain_key(&new_domain)])?;
        if !matches!(tenant.status, TenantStatus::Active | TenantStatus::Suspended) {
            return Err(PlinthError::validation(format!(
                "cannot migrate a tenant that is {}",
                tenant.status
            )));
        }
        if self
            .shared
            .tenants
            .domain_taken(&new_domain, None, Some(tenant_id))
            .await?
        {
            return Err(PlinthError::DomainExists { domain: new_domain });
        }

        info!(tenant_id = %tenant_id, from = %tenant.domain, to = %new_domain, "Migrating tenant domain");
        let old_domain = tenant.domain.clone();
        let shared = &*self.shared;
        let mut ctx = StepContext::new(new_domain, Some(tenant));
        let steps: Vec<Box<dyn Step<StepContext> + '_>> = vec![
            Box::new(DnsStep(shared)),
            Box::new(CertificateStep(shared)),
            Box::new(ProxyStep(shared)),
            Box::new(VerifyStep(shared)),
            Box::new(SwitchDomainStep {
                shared,
                old_domain: old_domain.clone(),
            }),
        ];

        saga::run(&steps, &mut ctx, shared.config.step_timeout())
            .await
            .map_err(step_failed)?;

        let tenant = ctx
            .tenant
            .take()
            .ok_or_else(|| PlinthError::Internal("migration lost the tenant record".into()))?;

        let mut failures = Vec::new();
        let old_domain_teardown = self.teardown_domain(&old_domain, &mut failures).await;

        info!(tenant_id = %tenant_id, domain = %tenant.domain, "Tenant domain migrated");
        Ok(MigrationReport {
            tenant,
            old_domain,
            old_domain_teardown,
            failures,
        })
    }

    pub async fn status(&self, tenant_id: Uuid) -> PlinthResult<TenantStatusReport> {
        let tenant = self.shared.tenants.get_by_id(tenant_id).await?;
        let registry = &self.shared.registry;
        let connection_cached = registry.contains(tenant_id);

        let database_reachable = if connection_cached {
            match registry.acquire(tenant_id).await {
                Ok(conn) => match conn.session().await {
                    Ok(session) => session.db().query("RETURN true").await.is_ok(),
                    Err(_) => false,
                },
                Err(_) => false,
            }
        } else {
            registry
                .server()
                .database_exists(&tenant.database_name)
                .await
                .inspect_err(|e| {
                    warn!(tenant_id = %tenant_id, error = %e, "Database server check failed");
                })
                .unwrap_or(false)
        };

        Ok(TenantStatusReport {
            tenant_id,
            domain: tenant.domain,
            directory_status: tenant.status,
            database_reachable,
            connection_cached,
        })
    }

    /// Block all traffic for an active tenant.
    pub async fn suspend(&self, tenant_id: Uuid) -> PlinthResult<Tenant> {
        let _guard = self.lock(vec![tenant_key(tenant_id)])?;
        let tenant = self.shared.tenants.get_by_id(tenant_id).await?;
        if !tenant.status.can_transition_to(TenantStatus::Suspended) {
            return Err(PlinthError::validation(format!(
                "cannot suspend a tenant that is {}",
                tenant.status
            )));
        }
        let tenant = self
            .shared
            .tenants
            .set_status(tenant_id, TenantStatus::Suspended)
            .await?;
        self.shared.registry.close(tenant_id);
        info!(tenant_id = %tenant_id, "Tenant suspended");
        Ok(tenant)
    }

    /// Return a suspended tenant to service.
    pub async fn reactivate(&self, tenant_id: Uuid) -> PlinthResult<Tenant> {
        let _guard = self.lock(vec![tenant_key(tenant_id)])?;
        let tenant = self.shared.tenants.get_by_id(tenant_id).await?;
        if tenant.status != TenantStatus::Suspended {
            return Err(PlinthError::validation(format!(
                "cannot reactivate a tenant that is {}",
                tenant.status
            )));
        }
        let tenant = self
            .shared
            .tenants
            .set_status(tenant_id, TenantStatus::Active)
            .await?;
        info!(tenant_id = %tenant_id, "Tenant reactivated");
        Ok(tenant)
    }

    fn lock(&self, keys: Vec<String>) -> PlinthResult<InFlightGuard> {
        let mut guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            keys: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            if !self.in_flight.insert(key.clone()) {
                return Err(PlinthError::ProvisioningInProgress { key });
            }
            guard.keys.push(key);
        }
        Ok(guard)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = TenancyResult<T>>,
    ) -> TenancyResult<T> {
        let limit = self.shared.config.step_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TenancyError::Timeout {
                operation: operation.to_string(),
                secs: limit.as_secs(),
            })?
    }

    /// Remove DNS, proxy routing and certificate for `domain`.
    async fn teardown_domain(&self, domain: &str, failures: &mut Vec<String>) -> DomainTeardown {
        let shared = &*self.shared;
        let mut teardown = DomainTeardown::default();

        let dns = shared
            .collaborators
            .dns
            .as_ref()
            .filter(|_| !shared.config.covered_by_wildcard(domain));
        if let Some(dns) = dns {
            let removed = self
                .bounded("dns", async {
                    let records = dns.list_records(domain, "A").await?;
                    for record in records
                        .iter()
                        .filter(|r| r.content == shared.config.server_ip)
                    {
                        dns.delete_record(&record.id).await?;
                    }
                    Ok::<_, TenancyError>(())
                })
                .await;
            match removed {
                Ok(()) => teardown.dns_removed = true,
                Err(e) => record_failure(failures, "dns", e),
            }
        }

        if let Some(proxy) = &shared.collaborators.proxy {
            let removed = self
                .bounded("proxy", async {
                    proxy.remove_site(domain).await?;
                    proxy.reload().await
                })
                .await;
            match removed {
                Ok(()) => teardown.proxy_removed = true,
                Err(e) => record_failure(failures, "proxy", e),
            }
        }

        let acme = shared
            .collaborators
            .acme
            .as_ref()
            .filter(|_| shared.config.acme.revoke_on_teardown);
        if let Some(acme) = acme {
            let revoked = self
                .bounded("certificate", async {
                    if !acme.has_valid_certificate(domain).await? {
                        return Ok::<_, TenancyError>(false);
                    }
                    acme.revoke_certificate(domain).await?;
                    Ok(true)
                })
                .await;
            match revoked {
                Ok(revoked) => teardown.certificate_revoked = revoked,
                Err(e) => record_failure(failures, "certificate", e),
            }
        }

        teardown
    }
}

fn record_failure(failures: &mut Vec<String>, step: &str, cause: impl fmt::Display) {
    let err = TenancyError::CleanupFailed {
        step: step.to_string(),
        cause: cause.to_string(),
    };
    warn!(step = %step, error = %err, "Teardown step failed, continuing");
    failures.push(err.to_string());
}

/// Surface a saga failure. A domain conflict at record creation is a
/// precondition failure with nothing to roll back, and is returned as is.
fn step_failed(failure: SagaFailure) -> PlinthError {
    let cleanup_complete = failure.cleanup_complete();
    match failure.cause {
        TenancyError::Core(PlinthError::DomainExists { domain }) if failure.step == "record" => {
            PlinthError::DomainExists { domain }
        }
        cause => {
            error!(
                step = failure.step,
                error = %cause,
                cleanup_complete,
                "Tenant operation rolled back"
            );
            PlinthError::ProvisioningStepFailed {
                step: failure.step.to_string(),
                cause: cause.to_string(),
                cleanup_complete,
            }
        }
    }
}

fn normalize_request(mut input: CreateTenant) -> PlinthResult<CreateTenant> {
    input.name = input.name.trim().to_string();
    if input.name.is_empty() {
        return Err(PlinthError::validation("tenant name must not be empty"));
    }
    input.contact_email = input.contact_email.trim().to_string();
    if !input.contact_email.contains('@') {
        return Err(PlinthError::validation(format!(
            "'{}' is not a valid contact e-mail",
            input.contact_email
        )));
    }

    input.domain = normalize_host(&input.domain);
    validate_domain(&input.domain)?;

    input.subdomain = match input.subdomain.take() {
        Some(label) => {
            let label = label.trim().to_ascii_lowercase();
            if label.is_empty() {
                None
            } else if is_valid_label(&label) {
                Some(label)
            } else {
                return Err(PlinthError::validation(format!(
                    "'{label}' is not a valid subdomain label"
                )));
            }
        }
        None => None,
    };
    Ok(input)
}
