use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::run_command;
use crate::config::ProxyConfig;
use crate::error::{TenancyError, TenancyResult};
use crate::host::is_valid_domain;

#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Render and install the routing fragment for `domain`.
    async fn write_site(&self, domain: &str) -> TenancyResult<()>;

    /// Remove the fragment for `domain`. Succeeds if there is none.
    async fn remove_site(&self, domain: &str) -> TenancyResult<()>;

    /// Check the full proxy configuration, including installed fragments.
    async fn validate(&self) -> TenancyResult<()>;

    async fn reload(&self) -> TenancyResult<()>;
}

/// Render the nginx server block routing `domain` to `upstream`.
///
/// With a certificate directory the block terminates TLS and redirects
/// plain HTTP; without one it serves plain HTTP only.
pub fn render_site_fragment(domain: &str, upstream: &str, tls_dir: Option<&Path>) -> String {
    let proxy_block = format!(
        "    location / {{\n\
         \x20       proxy_pass http://{upstream};\n\
         \x20       proxy_set_header Host $host;\n\
         \x20       proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
         \x20       proxy_set_header X-Forwarded-Proto $scheme;\n\
         \x20   }}\n"
    );
    let acme_block = "    location /.well-known/acme-challenge/ {\n\
                      \x20       root /var/www/certbot;\n\
                      \x20   }\n";

    match tls_dir {
        Some(dir) => {
            let dir = dir.join(domain);
            format!(
                "server {{\n\
                 \x20   listen 80;\n\
                 \x20   server_name {domain};\n\
                 {acme_block}\
                 \x20   location / {{\n\
                 \x20       return 301 https://$host$request_uri;\n\
                 \x20   }}\n\
                 }}\n\
                 \n\
                 server {{\n\
                 \x20   listen 443 ssl;\n\
                 \x20   server_name {domain};\n\
                 \x20   ssl_certificate {fullchain};\n\
                 \x20   ssl_certificate_key {key};\n\
                 {proxy_block}\
                 }}\n",
                fullchain = dir.join("fullchain.pem").display(),
                key = dir.join("privkey.pem").display(),
            )
        }
        None => format!(
            "server {{\n\
             \x20   listen 80;\n\
             \x20   server_name {domain};\n\
             {acme_block}\
             {proxy_block}\
             }}\n"
        ),
    }
}

/// Structural checks run before a fragment is handed to the proxy.
pub fn check_fragment(fragment: &str) -> Result<(), String> {
    let mut depth: i64 = 0;
    for c in fragment.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced closing brace".into());
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced braces".into());
    }

    let mut server_names = fragment
        .lines()
        .filter_map(|line| line.trim().strip_prefix("server_name"))
        .peekable();
    if server_names.peek().is_none() {
        return Err("missing server_name".into());
    }
    for names in server_names {
        let names = names.trim().trim_end_matches(';').trim();
        if names.is_empty() {
            return Err("empty server_name".into());
        }
        if let Some(bad) = names.split_whitespace().find(|n| !is_valid_domain(n)) {
            return Err(format!("invalid server_name '{bad}'"));
        }
    }
    Ok(())
}

/// Per-domain nginx fragments in a sites directory.
pub struct NginxProxy {
    config: ProxyConfig,
    /// Certificate directory when TLS is enabled.
    tls_dir: Option<PathBuf>,
    timeout: Duration,
}

impl NginxProxy {
    pub fn new(config: ProxyConfig, tls_dir: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            config,
            tls_dir,
            timeout,
        }
    }

    pub fn fragment_path(&self, domain: &str) -> PathBuf {
        self.config.sites_dir.join(format!("{domain}.conf"))
    }
}

#[async_trait]
impl ReverseProxy for NginxProxy {
    async fn write_site(&self, domain: &str) -> TenancyResult<()> {
        let fragment = render_site_fragment(domain, &self.config.upstream, self.tls_dir.as_deref());
        check_fragment(&fragment).map_err(TenancyError::ProxyConfigInvalid)?;

        tokio::fs::create_dir_all(&self.config.sites_dir).await?;
        let path = self.fragment_path(domain);
        let staging = path.with_extension("conf.tmp");
        tokio::fs::write(&staging, fragment).await?;
        tokio::fs::rename(&staging, &path).await?;

        info!(domain = %domain, path = %path.display(), "Proxy fragment written");
        Ok(())
    }

    async fn remove_site(&self, domain: &str) -> TenancyResult<()> {
        let path = self.fragment_path(domain);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(domain = %domain, "Proxy fragment removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn validate(&self) -> TenancyResult<()> {
        if self.config.validate_cmd.is_empty() {
            return Ok(());
        }
        run_command(&self.config.validate_cmd, self.timeout, TenancyError::ProxyConfigInvalid)
            .await
            .map(|_| ())
    }

    async fn reload(&self) -> TenancyResult<()> {
        if self.config.reload_cmd.is_empty() {
            return Ok(());
        }
        run_command(&self.config.reload_cmd, self.timeout, TenancyError::Proxy).await?;
        info!("Reverse proxy reloaded");
        Ok(())
    }
}
