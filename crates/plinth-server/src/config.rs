//! Server configuration, loaded from a TOML file.

use std::path::Path;

use plinth_auth::AuthConfig;
use plinth_db::{DbConfig, RegistryConfig};
use plinth_tenancy::TenancyConfig;
use serde::Deserialize;
use tracing::info;

use crate::error::ServerError;

/// Top-level configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    pub listen_addr: String,
    /// Bearer token guarding `/admin`. Without one the admin API
    /// rejects every request.
    pub admin_token: Option<String>,
    pub db: DbConfig,
    pub auth: AuthConfig,
    pub registry: RegistryConfig,
    pub tenancy: TenancyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            admin_token: None,
            db: DbConfig::default(),
            auth: AuthConfig::default(),
            registry: RegistryConfig::default(),
            tenancy: TenancyConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ServerError::Io(e)),
        };
        let config = Self::parse(&text)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        config
            .tenancy
            .validate()
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert!(config.admin_token.is_none());
        assert_eq!(config.registry.max_connections, 5);
        assert_eq!(config.tenancy.step_timeout_secs, 120);
        assert!(config.tenancy.dns.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = ServerConfig::parse(
            r#"
            listen_addr = "127.0.0.1:9000"
            admin_token = "s3cret"

            [db]
            url = "db.internal:8000"

            [registry]
            max_connections = 12

            [tenancy]
            server_ip = "198.51.100.4"
            wildcard_base_domains = ["*.plinth.app"]

            [tenancy.dns]
            api_token = "cf-token"
            zone_id = "zone"

            [tenancy.acme]
            enabled = true
            email = "ops@example.com"
            challenge = "http"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.db.url, "db.internal:8000");
        assert_eq!(config.db.namespace, "plinth");
        assert_eq!(config.registry.max_connections, 12);
        assert_eq!(config.registry.idle_timeout_secs, 900);
        assert_eq!(config.tenancy.server_ip, "198.51.100.4");
        assert_eq!(config.tenancy.dns.as_ref().unwrap().zone_id, "zone");
        assert!(config.tenancy.acme.enabled);
        assert!(config.tenancy.covered_by_wildcard("acme.plinth.app"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = [").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn unsatisfiable_verify_delay_is_rejected_at_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[tenancy]\nstep_timeout_secs = 10\n\n[tenancy.verify]\nenabled = true\ngrace_delay_secs = 10"
        )
        .unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        match err {
            ServerError::Config(message) => assert!(message.contains("grace_delay_secs")),
            other => panic!("expected a config error, got {other:?}"),
        }
    }
}
