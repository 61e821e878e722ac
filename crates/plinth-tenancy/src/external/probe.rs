use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use crate::config::VerifyConfig;
use crate::error::{TenancyError, TenancyResult};

/// End-to-end reachability check for a freshly routed domain.
#[async_trait]
pub trait VerificationProbe: Send + Sync {
    async fn check(&self, domain: &str) -> TenancyResult<()>;
}

/// Probes `GET <scheme>://<domain><path>` over the public network.
pub struct HttpProbe {
    client: Client,
    scheme: &'static str,
    path: String,
}

impl HttpProbe {
    pub fn new(config: &VerifyConfig) -> TenancyResult<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };
        Ok(Self {
            client,
            scheme: if config.https { "https" } else { "http" },
            path,
        })
    }

    pub fn url_for(&self, domain: &str) -> String {
        format!("{}://{domain}{}", self.scheme, self.path)
    }
}

#[async_trait]
impl VerificationProbe for HttpProbe {
    async fn check(&self, domain: &str) -> TenancyResult<()> {
        let url = self.url_for(domain);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TenancyError::Verification(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TenancyError::Verification(format!("{url} returned {status}")));
        }
        info!(domain = %domain, "Verification probe succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_probe_url() {
        let probe = HttpProbe::new(&VerifyConfig {
            path: "health".into(),
            https: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(probe.url_for("acme.example.com"), "http://acme.example.com/health");
    }
}
