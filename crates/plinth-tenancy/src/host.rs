//! Host-name normalization and validation.

use plinth_core::error::{PlinthError, PlinthResult};

/// Canonical form of an inbound `Host` value.
///
/// Lowercases, strips a port (bracketed IPv6 included) and a trailing
/// root dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else if host.matches(':').count() == 1 {
        host.split(':').next().unwrap_or(host)
    } else {
        host
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

/// A single DNS label: 1 to 63 of `[a-z0-9-]`, no leading or trailing hyphen.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// A fully-qualified tenant domain: at least two valid labels.
pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253 && domain.split('.').count() >= 2 && domain.split('.').all(is_valid_label)
}

pub(crate) fn validate_domain(domain: &str) -> PlinthResult<()> {
    if is_valid_domain(domain) {
        Ok(())
    } else {
        Err(PlinthError::validation(format!(
            "'{domain}' is not a valid domain name"
        )))
    }
}
