use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, info};

use super::run_command;
use crate::config::{AcmeConfig, ChallengeMethod};
use crate::error::{TenancyError, TenancyResult};

/// Certificates issued less than this long ago are reused.
const CERTIFICATE_REUSE_WINDOW: Duration = Duration::from_secs(60 * 24 * 60 * 60);

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn has_valid_certificate(&self, domain: &str) -> TenancyResult<bool>;

    /// Obtain a certificate for `domain`. Succeeds without contacting
    /// the authority when a valid one is already present.
    async fn issue_certificate(&self, domain: &str, method: ChallengeMethod) -> TenancyResult<()>;

    async fn revoke_certificate(&self, domain: &str) -> TenancyResult<()>;
}

/// Certificates obtained by running the `certbot` client.
pub struct CertbotClient {
    config: AcmeConfig,
}

impl CertbotClient {
    pub fn new(config: AcmeConfig) -> Self {
        Self { config }
    }

    fn bundle_path(&self, domain: &str) -> PathBuf {
        self.config.cert_dir.join(domain).join("fullchain.pem")
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn base_args(&self, subcommand: &str) -> Vec<String> {
        let mut argv = vec![
            self.config.certbot_bin.display().to_string(),
            subcommand.to_string(),
            "--non-interactive".to_string(),
        ];
        if self.config.staging {
            argv.push("--staging".to_string());
        }
        argv
    }

    fn issue_args(&self, domain: &str, method: ChallengeMethod) -> TenancyResult<Vec<String>> {
        let mut argv = self.base_args("certonly");
        argv.extend(["--agree-tos".to_string(), "--keep-until-expiring".to_string()]);
        if self.config.email.is_empty() {
            argv.push("--register-unsafely-without-email".to_string());
        } else {
            argv.extend(["-m".to_string(), self.config.email.clone()]);
        }
        match method {
            ChallengeMethod::Http => argv.extend([
                "--webroot".to_string(),
                "-w".to_string(),
                self.config.webroot.display().to_string(),
            ]),
            ChallengeMethod::Dns => {
                let credentials = self.config.dns_credentials.as_ref().ok_or_else(|| {
                    TenancyError::Acme("DNS challenge requires acme.dns_credentials".into())
                })?;
                argv.extend([
                    "--dns-cloudflare".to_string(),
                    "--dns-cloudflare-credentials".to_string(),
                    credentials.display().to_string(),
                ]);
            }
        }
        argv.extend(["-d".to_string(), domain.to_string()]);
        Ok(argv)
    }
}

#[async_trait]
impl CertificateAuthority for CertbotClient {
    async fn has_valid_certificate(&self, domain: &str) -> TenancyResult<bool> {
        let metadata = match tokio::fs::metadata(self.bundle_path(domain)).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let age = SystemTime::now()
            .duration_since(metadata.modified()?)
            .unwrap_or_default();
        Ok(age < CERTIFICATE_REUSE_WINDOW)
    }

    async fn issue_certificate(&self, domain: &str, method: ChallengeMethod) -> TenancyResult<()> {
        if self.has_valid_certificate(domain).await? {
            debug!(domain = %domain, "Reusing existing certificate");
            return Ok(());
        }
        let argv = self.issue_args(domain, method)?;
        run_command(&argv, self.timeout(), TenancyError::Acme).await?;
        info!(domain = %domain, ?method, "Certificate issued");
        Ok(())
    }

    async fn revoke_certificate(&self, domain: &str) -> TenancyResult<()> {
        let mut argv = self.base_args("revoke");
        argv.extend([
            "--cert-name".to_string(),
            domain.to_string(),
            "--delete-after-revoke".to_string(),
        ]);
        run_command(&argv, self.timeout(), TenancyError::Acme).await?;
        info!(domain = %domain, "Certificate revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(dir: &std::path::Path) -> CertbotClient {
        CertbotClient::new(AcmeConfig {
            enabled: true,
            email: "ops@plinth.test".into(),
            cert_dir: dir.to_path_buf(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn fresh_bundle_counts_as_valid() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        assert!(!client.has_valid_certificate("acme.example.com").await.unwrap());

        let domain_dir = dir.path().join("acme.example.com");
        std::fs::create_dir_all(&domain_dir).unwrap();
        std::fs::write(domain_dir.join("fullchain.pem"), "-----BEGIN CERTIFICATE-----").unwrap();

        assert!(client.has_valid_certificate("acme.example.com").await.unwrap());
    }

    #[test]
    fn http_challenge_uses_webroot() {
        let dir = tempfile::tempdir().unwrap();
        let argv = client(dir.path())
            .issue_args("acme.example.com", ChallengeMethod::Http)
            .unwrap();
        assert!(argv.contains(&"--webroot".to_string()));
        assert!(argv.ends_with(&["-d".to_string(), "acme.example.com".to_string()]));
    }

    #[test]
    fn dns_challenge_needs_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let result = client(dir.path()).issue_args("acme.example.com", ChallengeMethod::Dns);
        assert!(matches!(result, Err(TenancyError::Acme(_))));
    }
}
