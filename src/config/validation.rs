//! Configuration validation.

use std::time::Duration;

use super::ConfigError;
use crate::utils::url_validation::{validate_proxy_url as check_proxy_url, validate_realtime_url};

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

pub(super) fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    validate_realtime_url(endpoint)
        .map(|_| ())
        .map_err(|e| invalid("endpoint", e.to_string()))
}

pub(super) fn validate_proxy_url(proxy_url: &str) -> Result<(), ConfigError> {
    check_proxy_url(proxy_url)
        .map(|_| ())
        .map_err(|e| invalid("proxy_url", e.to_string()))
}

pub(super) fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

pub(super) fn validate_sample_rate(sample_rate: u32) -> Result<(), ConfigError> {
    if sample_rate == 0 {
        return Err(invalid("sample_rate", "must be greater than zero"));
    }
    Ok(())
}

/// Slowest playback rate accepted.
const MIN_PLAYBACK_SPEED: f64 = 0.25;
/// Fastest playback rate accepted.
const MAX_PLAYBACK_SPEED: f64 = 4.0;

pub(super) fn validate_playback_speed(speed: f64) -> Result<(), ConfigError> {
    if !(MIN_PLAYBACK_SPEED..=MAX_PLAYBACK_SPEED).contains(&speed) {
        return Err(invalid(
            "playback_speed",
            format!("must be within [{MIN_PLAYBACK_SPEED}, {MAX_PLAYBACK_SPEED}], got {speed}"),
        ));
    }
    Ok(())
}

pub(super) fn validate_threshold(threshold: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(invalid(
            "vad threshold",
            format!("must be within [0, 1], got {threshold}"),
        ));
    }
    Ok(())
}

pub(super) fn validate_temperature(temperature: f32) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(invalid(
            "temperature",
            format!("must be within [0, 2], got {temperature}"),
        ));
    }
    Ok(())
}

pub(super) fn validate_connect_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(invalid("connect_timeout", "must be greater than zero"));
    }
    Ok(())
}
