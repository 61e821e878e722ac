//! The individual provisioning steps and their compensations.

use async_trait::async_trait;
use plinth_auth::{generate_temporary_password, hash_password};
use plinth_core::error::PlinthError;
use plinth_core::models::tenant::{CreateTenant, Tenant, TenantStatus};
use plinth_core::models::user::{CreateUser, UserRole};
use plinth_core::repository::{TenantRepository, UserRepository};
use plinth_db::DatabaseServer;
use tracing::{info, warn};

use super::{AdminCredential, Shared};
use crate::config::ChallengeMethod;
use crate::error::{TenancyError, TenancyResult};
use crate::saga::Step;

/// State threaded through a provisioning or migration run.
pub(crate) struct StepContext {
    /// Domain being brought up.
    pub domain: String,
    pub tenant: Option<Tenant>,
    /// DNS records created by this run.
    pub dns_records: Vec<String>,
    /// Set before the create call, so a cut-off call is still undone.
    pub dns_requested: bool,
    /// Set before issuance for the same reason.
    pub certificate_requested: bool,
    pub admin: Option<AdminCredential>,
}

impl StepContext {
    pub fn new(domain: String, tenant: Option<Tenant>) -> Self {
        Self {
            domain,
            tenant,
            dns_records: Vec::new(),
            dns_requested: false,
            certificate_requested: false,
            admin: None,
        }
    }

    fn tenant(&self) -> TenancyResult<&Tenant> {
        self.tenant
            .as_ref()
            .ok_or_else(|| PlinthError::Internal("no tenant record in context".into()).into())
    }
}

// ---------------------------------------------------------------------------
// 1. Directory record
// ---------------------------------------------------------------------------

pub(crate) struct RecordStep<'a, R, S: DatabaseServer> {
    pub shared: &'a Shared<R, S>,
    pub input: CreateTenant,
}

#[async_trait]
impl<'a, R, S> Step<StepContext> for RecordStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "record"
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant = self.shared.tenants.create(self.input.clone()).await?;
        info!(tenant_id = %tenant.id, domain = %tenant.domain, "Tenant record created");
        ctx.tenant = Some(tenant);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant = match ctx.tenant.take() {
            Some(tenant) => Some(tenant),
            // Cut off before the insert returned. The domain lock is held,
            // so a row still in provisioning for this domain is ours.
            None => self
                .shared
                .tenants
                .find_by_domain(&self.input.domain)
                .await?
                .filter(|t| t.status == TenantStatus::Provisioning),
        };
        if let Some(tenant) = tenant {
            self.shared.tenants.delete(tenant.id).await?;
            info!(tenant_id = %tenant.id, "Tenant record deleted");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 2. Dedicated database
// ---------------------------------------------------------------------------

pub(crate) struct DatabaseStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

#[async_trait]
impl<'a, R, S> Step<StepContext> for DatabaseStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "database"
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant = ctx.tenant()?;
        self.0
            .registry
            .server()
            .create_database(&tenant.database_name)
            .await?;
        info!(tenant_id = %tenant.id, database = %tenant.database_name, "Tenant database created");
        Ok(())
    }

    async fn compensate(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant = ctx.tenant()?;
        self.0.registry.close(tenant.id);
        self.0
            .registry
            .server()
            .drop_database(&tenant.database_name)
            .await?;
        info!(tenant_id = %tenant.id, database = %tenant.database_name, "Tenant database dropped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 3. Schema
// ---------------------------------------------------------------------------

/// Opens the first registry handle, which initializes the schema.
pub(crate) struct SchemaStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

#[async_trait]
impl<'a, R, S> Step<StepContext> for SchemaStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "schema"
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant_id = ctx.tenant()?.id;
        // Never reuse a handle left over from an earlier attempt.
        self.0.registry.close(tenant_id);
        self.0.registry.acquire(tenant_id).await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        self.0.registry.close(ctx.tenant()?.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 4. DNS
// ---------------------------------------------------------------------------

pub(crate) struct DnsStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

#[async_trait]
impl<'a, R, S> Step<StepContext> for DnsStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "dns"
    }

    fn applies(&self, ctx: &StepContext) -> bool {
        self.0.collaborators.dns.is_some() && !self.0.config.covered_by_wildcard(&ctx.domain)
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let Some(dns) = &self.0.collaborators.dns else {
            return Ok(());
        };
        let target = &self.0.config.server_ip;

        let existing = dns.list_records(&ctx.domain, "A").await?;
        if existing.iter().any(|record| &record.content == target) {
            info!(domain = %ctx.domain, "DNS record already points at this server");
            return Ok(());
        }

        let proxied = self.0.config.dns.as_ref().is_some_and(|c| c.proxied);
        ctx.dns_requested = true;
        let record = dns.create_record("A", &ctx.domain, target, proxied).await?;
        ctx.dns_records.push(record.id);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let Some(dns) = &self.0.collaborators.dns else {
            return Ok(());
        };
        let mut ids = std::mem::take(&mut ctx.dns_records);
        if ids.is_empty() && ctx.dns_requested {
            // The create call never answered. No record pointed here
            // before it, so any that does now came from this run.
            ids = dns
                .list_records(&ctx.domain, "A")
                .await?
                .into_iter()
                .filter(|r| r.content == self.0.config.server_ip)
                .map(|r| r.id)
                .collect();
        }
        ctx.dns_requested = false;

        let mut failed = Vec::new();
        for id in ids {
            if let Err(e) = dns.delete_record(&id).await {
                failed.push(format!("{id}: {e}"));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(TenancyError::Dns(failed.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// 5. TLS certificate
// ---------------------------------------------------------------------------

pub(crate) struct CertificateStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

impl<R, S: DatabaseServer> CertificateStep<'_, R, S> {
    fn challenge(&self) -> ChallengeMethod {
        self.0.config.acme.challenge.unwrap_or(if self.0.collaborators.dns.is_some() {
            ChallengeMethod::Dns
        } else {
            ChallengeMethod::Http
        })
    }
}

#[async_trait]
impl<'a, R, S> Step<StepContext> for CertificateStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "certificate"
    }

    fn applies(&self, _ctx: &StepContext) -> bool {
        self.0.collaborators.acme.is_some()
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let Some(acme) = &self.0.collaborators.acme else {
            return Ok(());
        };
        if acme.has_valid_certificate(&ctx.domain).await? {
            info!(domain = %ctx.domain, "Valid certificate already present");
            return Ok(());
        }
        ctx.certificate_requested = true;
        acme.issue_certificate(&ctx.domain, self.challenge()).await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let Some(acme) = &self.0.collaborators.acme else {
            return Ok(());
        };
        if !ctx.certificate_requested {
            return Ok(());
        }
        // Issuance may have been cut off before or after it landed.
        if acme.has_valid_certificate(&ctx.domain).await? {
            acme.revoke_certificate(&ctx.domain).await?;
        }
        ctx.certificate_requested = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 6. Reverse proxy
// ---------------------------------------------------------------------------

pub(crate) struct ProxyStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

#[async_trait]
impl<'a, R, S> Step<StepContext> for ProxyStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn applies(&self, _ctx: &StepContext) -> bool {
        self.0.collaborators.proxy.is_some()
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let Some(proxy) = &self.0.collaborators.proxy else {
            return Ok(());
        };

        proxy.write_site(&ctx.domain).await?;

        // The running proxy must never load a fragment that failed checks.
        let activated = async {
            proxy.validate().await?;
            proxy.reload().await
        }
        .await;

        if let Err(e) = activated {
            if let Err(cleanup) = proxy.remove_site(&ctx.domain).await {
                warn!(domain = %ctx.domain, error = %cleanup, "Failed to remove rejected proxy fragment");
            }
            return Err(e);
        }

        info!(domain = %ctx.domain, "Reverse proxy routing installed");
        Ok(())
    }

    /// Runs after a completed or timed-out apply; in the latter case the
    /// fragment may be on disk and loaded, so removal is unconditional.
    async fn compensate(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let Some(proxy) = &self.0.collaborators.proxy else {
            return Ok(());
        };
        proxy.remove_site(&ctx.domain).await?;
        proxy.reload().await
    }
}

// ---------------------------------------------------------------------------
// 7. Verification
// ---------------------------------------------------------------------------

pub(crate) struct VerifyStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

#[async_trait]
impl<'a, R, S> Step<StepContext> for VerifyStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "verify"
    }

    fn applies(&self, _ctx: &StepContext) -> bool {
        self.0.collaborators.probe.is_some()
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let Some(probe) = &self.0.collaborators.probe else {
            return Ok(());
        };
        tokio::time::sleep(self.0.config.verify.grace_delay()).await;
        probe.check(&ctx.domain).await
    }
}

// ---------------------------------------------------------------------------
// 8. Default administrator
// ---------------------------------------------------------------------------

pub(crate) struct AdminAccountStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

#[async_trait]
impl<'a, R, S> Step<StepContext> for AdminAccountStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "admin_account"
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant_id = ctx.tenant()?.id;
        let config = &self.0.config;
        let auth = &self.0.auth;

        let username = config.admin_username.trim().to_string();
        if username.is_empty() {
            return Err(PlinthError::validation("admin username must not be empty").into());
        }
        let mail_domain = if config.admin_email_domain.is_empty() {
            ctx.domain.as_str()
        } else {
            config.admin_email_domain.as_str()
        };
        let email = format!("{username}@{mail_domain}");

        let password =
            generate_temporary_password(auth.temporary_password_length, auth.min_password_length);
        let hash = {
            let password = password.clone();
            let pepper = auth.pepper.clone();
            tokio::task::spawn_blocking(move || hash_password(&password, pepper.as_deref()))
                .await
                .map_err(|e| PlinthError::Internal(format!("hashing task failed: {e}")))??
        };

        let conn = self.0.registry.acquire(tenant_id).await?;
        let session = conn.session().await?;
        session
            .users()
            .create(CreateUser {
                tenant_id,
                username: username.clone(),
                email: email.clone(),
                password_hash: hash,
                role: UserRole::Admin,
                must_change_password: true,
            })
            .await?;

        info!(tenant_id = %tenant_id, username = %username, "Default administrator created");
        ctx.admin = Some(AdminCredential {
            username,
            email,
            password,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 9. Activation
// ---------------------------------------------------------------------------

pub(crate) struct ActivateStep<'a, R, S: DatabaseServer>(pub &'a Shared<R, S>);

#[async_trait]
impl<'a, R, S> Step<StepContext> for ActivateStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "activate"
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant_id = ctx.tenant()?.id;
        let tenant = self
            .0
            .tenants
            .set_status(tenant_id, TenantStatus::Active)
            .await?;
        info!(tenant_id = %tenant_id, domain = %tenant.domain, "Tenant activated");
        ctx.tenant = Some(tenant);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Domain switch (migration only)
// ---------------------------------------------------------------------------

/// Points the directory record at the new domain.
pub(crate) struct SwitchDomainStep<'a, R, S: DatabaseServer> {
    pub shared: &'a Shared<R, S>,
    pub old_domain: String,
}

#[async_trait]
impl<'a, R, S> Step<StepContext> for SwitchDomainStep<'a, R, S>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    fn name(&self) -> &'static str {
        "switch_domain"
    }

    async fn apply(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant_id = ctx.tenant()?.id;
        let tenant = self.shared.tenants.set_domain(tenant_id, &ctx.domain).await?;
        info!(tenant_id = %tenant_id, from = %self.old_domain, to = %tenant.domain, "Tenant domain switched");
        ctx.tenant = Some(tenant);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut StepContext) -> TenancyResult<()> {
        let tenant_id = ctx.tenant()?.id;
        let tenant = self
            .shared
            .tenants
            .set_domain(tenant_id, &self.old_domain)
            .await?;
        ctx.tenant = Some(tenant);
        Ok(())
    }
}
