//! External control planes the orchestrator drives: DNS, certificate
//! authority, reverse proxy and the end-to-end verification probe.
//!
//! Each is a trait object so deployments can swap implementations and
//! tests can inject failures.

mod acme;
mod dns;
mod probe;
mod proxy;

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

pub use acme::{CertbotClient, CertificateAuthority};
pub use dns::{CloudflareDns, DnsProvider, DnsRecord};
pub use probe::{HttpProbe, VerificationProbe};
pub use proxy::{NginxProxy, ReverseProxy, check_fragment, render_site_fragment};

use crate::error::{TenancyError, TenancyResult};

/// Run an external command to completion, killing it after `timeout`.
///
/// A non-zero exit is mapped through `fail` with the command's stderr.
pub(crate) async fn run_command(
    argv: &[String],
    timeout: Duration,
    fail: fn(String) -> TenancyError,
) -> TenancyResult<String> {
    let Some((program, args)) = argv.split_first() else {
        return Err(fail("empty command".into()));
    };
    debug!(program = %program, ?args, "Running external command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| fail(format!("failed to start {program}: {e}")))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| TenancyError::Timeout {
            operation: program.clone(),
            secs: timeout.as_secs(),
        })??;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(fail(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let out = run_command(
            &argv(&["sh", "-c", "echo ok"]),
            Duration::from_secs(5),
            TenancyError::Proxy,
        )
        .await
        .unwrap();
        assert_eq!(out.trim(), "ok");
    }

    #[tokio::test]
    async fn failing_command_maps_stderr() {
        let err = run_command(
            &argv(&["sh", "-c", "echo broken >&2; exit 3"]),
            Duration::from_secs(5),
            TenancyError::Proxy,
        )
        .await
        .unwrap_err();
        match err {
            TenancyError::Proxy(msg) => assert!(msg.contains("broken")),
            other => panic!("expected proxy error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = run_command(
            &argv(&["sleep", "5"]),
            Duration::from_millis(100),
            TenancyError::Proxy,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TenancyError::Timeout { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = run_command(&[], Duration::from_secs(1), TenancyError::Acme)
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Acme(_)));
    }
}
