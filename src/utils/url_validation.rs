//! URL validation utilities
//!
//! This module validates the two URLs the session dials:
//! - the realtime endpoint, which must be a WebSocket URL (`wss://` or `ws://`)
//! - the credential proxy, which must be an HTTP URL (`https://` or `http://`)
//!
//! Plaintext schemes are accepted but logged unless the host is loopback.

use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be {expected}, got: {got}")]
    UnsupportedScheme {
        expected: &'static str,
        got: String,
    },

    #[error("URL must have a host")]
    MissingHost,
}

/// Whether `host` names the local machine.
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    trimmed
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

fn validate_with_schemes(
    raw: &str,
    secure: &'static str,
    plain: &'static str,
    expected: &'static str,
) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw)?;
    let scheme = url.scheme();
    if scheme != secure && scheme != plain {
        return Err(UrlValidationError::UnsupportedScheme {
            expected,
            got: scheme.to_string(),
        });
    }
    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if scheme == plain && !is_loopback_host(host) {
        warn!("Using unencrypted {}:// URL for host {}", plain, host);
    }
    Ok(url)
}

/// Validate the realtime WebSocket endpoint.
///
/// # Examples
/// ```rust,ignore
/// assert!(validate_realtime_url("wss://api.openai.com/v1/realtime").is_ok());
/// assert!(validate_realtime_url("https://api.openai.com/v1/realtime").is_err());
/// ```
pub fn validate_realtime_url(raw: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(raw, "wss", "ws", "wss or ws")
}

/// Validate the credential proxy URL.
pub fn validate_proxy_url(raw: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(raw, "https", "http", "https or http")
}
