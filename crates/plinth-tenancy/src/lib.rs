//! Plinth Tenancy — host-to-tenant resolution and the tenant lifecycle
//! orchestrator (provisioning, deprovisioning, domain migration).

pub mod config;
pub mod error;
pub mod external;
pub mod host;
pub mod provision;
pub mod resolver;
pub mod saga;

pub use config::{AcmeConfig, ChallengeMethod, DnsConfig, ProxyConfig, TenancyConfig, VerifyConfig};
pub use error::{TenancyError, TenancyResult};
pub use provision::{
    AdminCredential, Collaborators, DeprovisionReport, DomainTeardown, MigrationReport,
    ProvisionOutcome, Provisioner, TenantStatusReport,
};
pub use resolver::TenantResolver;
