//! Tenancy configuration.
//!
//! Every optional provisioning step is switched by a field here. The
//! orchestrator reads these once at construction and never consults the
//! environment at call time.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{TenancyError, TenancyResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Public address DNS records point at.
    pub server_ip: String,
    /// Base domains already covered by a wildcard DNS record. Tenant
    /// domains under one of these skip DNS registration.
    pub wildcard_base_domains: Vec<String>,
    /// DNS control API. `None` skips the DNS step entirely.
    pub dns: Option<DnsConfig>,
    pub acme: AcmeConfig,
    pub proxy: ProxyConfig,
    pub verify: VerifyConfig,
    /// Upper bound for any single provisioning step (default: 120 s).
    pub step_timeout_secs: u64,
    /// Username of the default administrator created in each tenant.
    pub admin_username: String,
    /// Mail domain for the default administrator. Falls back to the
    /// tenant's own domain when empty.
    pub admin_email_domain: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".into(),
            wildcard_base_domains: Vec::new(),
            dns: None,
            acme: AcmeConfig::default(),
            proxy: ProxyConfig::default(),
            verify: VerifyConfig::default(),
            step_timeout_secs: 120,
            admin_username: "admin".into(),
            admin_email_domain: String::new(),
        }
    }
}

impl TenancyConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Reject settings under which no provisioning run could succeed.
    pub fn validate(&self) -> TenancyResult<()> {
        if self.step_timeout_secs == 0 {
            return Err(TenancyError::Config("step_timeout_secs must be positive".into()));
        }
        // The grace delay is spent inside the verify step's budget.
        if self.verify.enabled && self.verify.grace_delay_secs >= self.step_timeout_secs {
            return Err(TenancyError::Config(format!(
                "verify.grace_delay_secs ({}) must be below step_timeout_secs ({})",
                self.verify.grace_delay_secs, self.step_timeout_secs
            )));
        }
        Ok(())
    }

    /// Whether `domain` sits under a base domain with a wildcard record.
    pub fn covered_by_wildcard(&self, domain: &str) -> bool {
        self.wildcard_base_domains.iter().any(|base| {
            let base = base.trim_start_matches("*.").trim_end_matches('.');
            domain
                .strip_suffix(base)
                .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
        })
    }
}

/// Cloudflare-compatible DNS API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    pub api_token: String,
    pub zone_id: String,
    #[serde(default = "default_dns_api_base")]
    pub api_base: String,
    /// Route traffic through the provider's proxy.
    #[serde(default)]
    pub proxied: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dns_api_base() -> String {
    "https://api.cloudflare.com/client/v4".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeMethod {
    Dns,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcmeConfig {
    pub enabled: bool,
    /// Account e-mail registered with the certificate authority.
    pub email: String,
    /// Explicit challenge method. When unset, DNS is used if a DNS API is
    /// configured and HTTP otherwise.
    pub challenge: Option<ChallengeMethod>,
    /// Directory holding one `<domain>/fullchain.pem` bundle per domain.
    pub cert_dir: PathBuf,
    pub certbot_bin: PathBuf,
    /// Webroot served for HTTP-01 challenges.
    pub webroot: PathBuf,
    /// Credentials file for the DNS-01 plugin.
    pub dns_credentials: Option<PathBuf>,
    /// Use the authority's staging endpoint.
    pub staging: bool,
    /// Revoke a domain's certificate when it is torn down.
    pub revoke_on_teardown: bool,
    pub timeout_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            email: String::new(),
            challenge: None,
            cert_dir: PathBuf::from("/etc/letsencrypt/live"),
            certbot_bin: PathBuf::from("certbot"),
            webroot: PathBuf::from("/var/www/certbot"),
            dns_credentials: None,
            staging: false,
            revoke_on_teardown: true,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    /// Directory the proxy loads per-domain fragments from.
    pub sites_dir: PathBuf,
    /// Address of the application the proxy forwards to.
    pub upstream: String,
    /// Command that checks the proxy configuration, e.g. `["nginx", "-t"]`.
    pub validate_cmd: Vec<String>,
    /// Command that reloads the running proxy.
    pub reload_cmd: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sites_dir: PathBuf::from("/etc/nginx/conf.d/tenants"),
            upstream: "127.0.0.1:3000".into(),
            validate_cmd: vec!["nginx".into(), "-t".into()],
            reload_cmd: vec!["nginx".into(), "-s".into(), "reload".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub enabled: bool,
    /// Wait before probing, for DNS propagation (default: 5 s).
    pub grace_delay_secs: u64,
    /// Path requested on the new domain.
    pub path: String,
    pub timeout_secs: u64,
    /// Probe over HTTPS. Falls back to plain HTTP when false.
    pub https: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_delay_secs: 5,
            path: "/health".into(),
            timeout_secs: 10,
            https: true,
        }
    }
}

impl VerifyConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_secs(self.grace_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
