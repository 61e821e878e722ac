use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::DnsConfig;
use crate::error::{TenancyError, TenancyResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn list_records(&self, name: &str, record_type: &str) -> TenancyResult<Vec<DnsRecord>>;

    async fn create_record(
        &self,
        record_type: &str,
        name: &str,
        content: &str,
        proxied: bool,
    ) -> TenancyResult<DnsRecord>;

    async fn delete_record(&self, id: &str) -> TenancyResult<()>;
}

/// Envelope of every Cloudflare v4 API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

impl<T> Envelope<T> {
    fn into_result(self) -> TenancyResult<Option<T>> {
        if self.success {
            return Ok(self.result);
        }
        let detail = self
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ");
        Err(TenancyError::Dns(detail))
    }
}

/// DNS records managed through the Cloudflare v4 API.
pub struct CloudflareDns {
    base_url: String,
    zone_id: String,
    api_token: String,
    client: Client,
}

impl CloudflareDns {
    pub fn new(config: &DnsConfig) -> TenancyResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            zone_id: config.zone_id.clone(),
            api_token: config.api_token.clone(),
            client,
        })
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, self.zone_id)
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn list_records(&self, name: &str, record_type: &str) -> TenancyResult<Vec<DnsRecord>> {
        let envelope: Envelope<Vec<DnsRecord>> = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.api_token)
            .query(&[("type", record_type), ("name", name)])
            .send()
            .await?
            .json()
            .await?;
        Ok(envelope.into_result()?.unwrap_or_default())
    }

    async fn create_record(
        &self,
        record_type: &str,
        name: &str,
        content: &str,
        proxied: bool,
    ) -> TenancyResult<DnsRecord> {
        let envelope: Envelope<DnsRecord> = self
            .client
            .post(self.records_url())
            .bearer_auth(&self.api_token)
            .json(&json!({
                "type": record_type,
                "name": name,
                "content": content,
                "ttl": 1,
                "proxied": proxied,
            }))
            .send()
            .await?
            .json()
            .await?;
        let record = envelope
            .into_result()?
            .ok_or_else(|| TenancyError::Dns("create returned no record".into()))?;
        info!(name = %name, record_id = %record.id, "DNS record created");
        Ok(record)
    }

    async fn delete_record(&self, id: &str) -> TenancyResult<()> {
        let envelope: Envelope<serde_json::Value> = self
            .client
            .delete(format!("{}/{id}", self.records_url()))
            .bearer_auth(&self.api_token)
            .send()
            .await?
            .json()
            .await?;
        envelope.into_result()?;
        info!(record_id = %id, "DNS record deleted");
        Ok(())
    }
}
