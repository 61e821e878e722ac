//! Tenant domain model.
//!
//! A tenant is one customer of the CMS. Each tenant owns a dedicated
//! database (named deterministically from its id), is reached through
//! its own domain or subdomain, and is subject to plan-driven limits.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the trial period granted to tenants on the `trial` plan.
pub const TRIAL_PERIOD_DAYS: i64 = 30;

/// Prefix shared by every per-tenant database name.
pub const TENANT_DATABASE_PREFIX: &str = "tenant_";

/// Derive the dedicated database name for a tenant.
///
/// The name is a pure function of the tenant id, so provisioning and
/// the connection registry always agree on it. Only `[a-z0-9_]` is
/// produced, which makes it safe to embed in DDL statements.
pub fn database_name(tenant_id: &Uuid) -> String {
    format!("{TENANT_DATABASE_PREFIX}{}", tenant_id.simple())
}

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// Resources are being created; the tenant serves no traffic.
    Provisioning,
    Active,
    /// Permanently disabled.
    Inactive,
    /// Administratively blocked; may return to `Active`.
    Suspended,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
            TenantStatus::Suspended => "suspended",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Transitions only move forward, except for the administrative
    /// `active <-> suspended` pair.
    pub fn can_transition_to(self, next: TenantStatus) -> bool {
        use TenantStatus::*;
        matches!(
            (self, next),
            (Provisioning, Active)
                | (Active, Suspended)
                | (Suspended, Active)
                | (Active, Inactive)
                | (Suspended, Inactive)
        )
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commercial plan. Drives [`TenantLimits`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Trial,
    Basic,
    Professional,
    Enterprise,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Trial => "trial",
            Plan::Basic => "basic",
            Plan::Professional => "professional",
            Plan::Enterprise => "enterprise",
        }
    }

    /// Quota attached to this plan. `None` means unlimited.
    pub fn limits(self) -> TenantLimits {
        match self {
            Plan::Trial => TenantLimits {
                max_users: Some(5),
                max_content_items: Some(100),
                max_taxonomy_items: Some(50),
                storage_quota_mb: 512,
            },
            Plan::Basic => TenantLimits {
                max_users: Some(10),
                max_content_items: Some(1_000),
                max_taxonomy_items: Some(200),
                storage_quota_mb: 5 * 1024,
            },
            Plan::Professional => TenantLimits {
                max_users: Some(50),
                max_content_items: Some(10_000),
                max_taxonomy_items: Some(1_000),
                storage_quota_mb: 50 * 1024,
            },
            Plan::Enterprise => TenantLimits {
                max_users: None,
                max_content_items: None,
                max_taxonomy_items: None,
                storage_quota_mb: 500 * 1024,
            },
        }
    }

    /// End of the trial period for a tenant switched to this plan at `now`.
    ///
    /// Only the trial plan carries an end date.
    pub fn trial_ends_at(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Plan::Trial => Some(now + Duration::days(TRIAL_PERIOD_DAYS)),
            _ => None,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured quota for a tenant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantLimits {
    pub max_users: Option<u32>,
    pub max_content_items: Option<u32>,
    /// Categories plus tags.
    pub max_taxonomy_items: Option<u32>,
    pub storage_quota_mb: u64,
}

/// One customer account, as recorded in the tenant directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub contact_name: String,
    pub contact_email: String,
    /// Fully-qualified host name, unique across tenants.
    pub domain: String,
    /// Short label, unique across tenants when present.
    pub subdomain: Option<String>,
    /// Dedicated database; fixed at creation.
    pub database_name: String,
    pub status: TenantStatus,
    pub plan: Plan,
    pub limits: TenantLimits,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Whether the tenant is on a trial whose end lies before `now`.
    pub fn trial_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.plan == Plan::Trial && self.trial_ends_at.is_some_and(|end| end <= now)
    }
}

/// Fields required to create a new tenant.
///
/// The directory assigns the id, database name, limits and trial end,
/// and always starts the tenant in [`TenantStatus::Provisioning`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub contact_name: String,
    pub contact_email: String,
    pub domain: String,
    pub subdomain: Option<String>,
    #[serde(default)]
    pub plan: Plan,
}

/// Fields that can be updated on an existing tenant.
///
/// Changing the plan recomputes limits and the trial end date.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateTenant {
    pub name: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub plan: Option<Plan>,
}

/// The slice of a tenant that request handlers see once the host has
/// been resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub name: String,
    pub domain: String,
    pub subdomain: Option<String>,
    pub database_name: String,
    pub plan: Plan,
    pub limits: TenantLimits,
}

impl From<&Tenant> for TenantContext {
    fn from(tenant: &Tenant) -> Self {
        Self {
            tenant_id: tenant.id,
            name: tenant.name.clone(),
            domain: tenant.domain.clone(),
            subdomain: tenant.subdomain.clone(),
            database_name: tenant.database_name.clone(),
            plan: tenant.plan,
            limits: tenant.limits,
        }
    }
}
