//! Host to tenant resolution.

use std::sync::Arc;

use chrono::Utc;
use plinth_core::error::{PlinthError, PlinthResult};
use plinth_core::models::tenant::{Tenant, TenantContext, TenantStatus};
use plinth_core::repository::TenantRepository;
use tracing::{debug, warn};

use crate::host::normalize_host;

/// Maps an inbound host name to an active tenant.
pub struct TenantResolver<R> {
    tenants: Arc<R>,
}

impl<R> Clone for TenantResolver<R> {
    fn clone(&self) -> Self {
        Self {
            tenants: Arc::clone(&self.tenants),
        }
    }
}

impl<R: TenantRepository + 'static> TenantResolver<R> {
    pub fn new(tenants: Arc<R>) -> Self {
        Self { tenants }
    }

    /// Resolve `host` to the context of an active tenant.
    ///
    /// Hosts with three or more labels are looked up both as
    /// `<subdomain>.<base>` and as an exact domain, concurrently. Rather
    /// than falling back to the exact domain only when the subdomain
    /// misses, an exact domain owned by a different tenant always wins
    /// over a subdomain label, so one tenant's label can never capture
    /// another tenant's domain. Status and trial checks run before
    /// anything touches the tenant's own database.
    pub async fn resolve(&self, host: &str) -> PlinthResult<TenantContext> {
        let host = normalize_host(host);
        let tenant = self.lookup(&host).await?;

        match tenant.status {
            TenantStatus::Active => {}
            TenantStatus::Suspended => {
                return Err(PlinthError::TenantSuspended {
                    domain: tenant.domain,
                });
            }
            // A tenant still being provisioned is not serving yet.
            TenantStatus::Inactive | TenantStatus::Provisioning => {
                return Err(PlinthError::TenantInactive {
                    domain: tenant.domain,
                });
            }
        }

        if tenant.trial_expired_at(Utc::now()) {
            return Err(PlinthError::TrialExpired {
                domain: tenant.domain,
            });
        }

        self.touch(tenant.id);
        Ok(TenantContext::from(&tenant))
    }

    /// Like [`resolve`](Self::resolve), but any failure yields `None`.
    pub async fn resolve_soft(&self, host: &str) -> Option<TenantContext> {
        match self.resolve(host).await {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                debug!(host = %host, error = %e, "Proceeding without tenant context");
                None
            }
        }
    }

    async fn lookup(&self, host: &str) -> PlinthResult<Tenant> {
        if host.is_empty() {
            return Err(PlinthError::TenantNotFound {
                host: String::new(),
                hint: "the request carried no Host header".into(),
            });
        }

        let labels: Vec<&str> = host.split('.').collect();
        let (by_domain, by_subdomain) = if labels.len() >= 3 {
            tokio::try_join!(
                self.tenants.find_by_domain(host),
                self.tenants.find_by_subdomain(labels[0]),
            )?
        } else {
            (self.tenants.find_by_domain(host).await?, None)
        };

        match (by_domain, by_subdomain) {
            (Some(tenant), _) | (None, Some(tenant)) => Ok(tenant),
            (None, None) => {
                let mut hint = format!("no tenant has domain '{host}'");
                if labels.len() >= 3 {
                    hint.push_str(&format!(" or subdomain '{}'", labels[0]));
                }
                hint.push_str(
                    "; check that the tenant has been provisioned and that DNS \
                     for this host points at this server",
                );
                Err(PlinthError::TenantNotFound {
                    host: host.to_string(),
                    hint,
                })
            }
        }
    }

    fn touch(&self, tenant_id: uuid::Uuid) {
        let tenants = Arc::clone(&self.tenants);
        tokio::spawn(async move {
            if let Err(e) = tenants.touch_last_activity(tenant_id).await {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to record tenant activity");
            }
        });
    }
}
