//! Environment variable overrides.
//!
//! Every variable is optional; unset or empty variables leave the current
//! value untouched.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::{ConfigError, VoiceConfig};
use crate::core::audio::CaptureProfile;
use crate::core::realtime::config::RealtimeVoice;

pub(crate) const ENV_KEYS: &[&str] = &[
    "VOXY_REALTIME_URL",
    "VOXY_MODEL",
    "VOXY_VOICE",
    "VOXY_INSTRUCTIONS",
    "VOXY_GREETING",
    "VOXY_TRANSCRIPTION_MODEL",
    "VOXY_TEMPERATURE",
    "VOXY_MAX_OUTPUT_TOKENS",
    "VOXY_CONNECT_TIMEOUT_SECS",
    "VOXY_SAMPLE_RATE",
    "VOXY_PLAYBACK_SPEED",
    "VOXY_CAPTURE_PROFILE",
    "VOXY_VAD_THRESHOLD",
    "VOXY_VAD_PREFIX_PADDING_MS",
    "VOXY_VAD_SILENCE_MS",
    "VOXY_PROXY_URL",
    "VOXY_KEY_FILE",
    "VOXY_KEY_PREFIX",
    "VOXY_PROMPT_FOR_KEY",
];

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    let Some(value) = var(key) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidEnv { key, value }),
    }
}

fn parse_bool(key: &'static str) -> Result<Option<bool>, ConfigError> {
    match var(key) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { key, value }),
        },
        None => Ok(None),
    }
}

/// Apply `VOXY_*` environment variables on top of `config`.
pub(crate) fn apply_env(config: &mut VoiceConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = var("VOXY_REALTIME_URL") {
        config.endpoint = endpoint;
    }
    if let Some(model) = var("VOXY_MODEL") {
        config.model = model;
    }
    if let Some(voice) = var("VOXY_VOICE") {
        config.voice = RealtimeVoice::from_str_or_default(&voice);
    }
    if let Some(instructions) = var("VOXY_INSTRUCTIONS") {
        config.instructions = instructions;
    }
    if let Some(greeting) = var("VOXY_GREETING") {
        config.greeting_prompt = greeting;
    }
    if let Some(model) = var("VOXY_TRANSCRIPTION_MODEL") {
        config.transcription_model = model;
    }
    if let Some(temperature) = parse("VOXY_TEMPERATURE")? {
        config.temperature = temperature;
    }
    if let Some(tokens) = parse("VOXY_MAX_OUTPUT_TOKENS")? {
        config.max_response_output_tokens = tokens;
    }
    if let Some(secs) = parse::<u64>("VOXY_CONNECT_TIMEOUT_SECS")? {
        config.connect_timeout = Duration::from_secs(secs);
    }

    if let Some(rate) = parse("VOXY_SAMPLE_RATE")? {
        config.audio.sample_rate = rate;
    }
    if let Some(speed) = parse("VOXY_PLAYBACK_SPEED")? {
        config.audio.playback_speed = speed;
    }
    if let Some(profile) = var("VOXY_CAPTURE_PROFILE") {
        config.audio.capture_profile = CaptureProfile::from_str_or_default(&profile);
    }

    if let Some(threshold) = parse("VOXY_VAD_THRESHOLD")? {
        config.turn_detection.threshold = threshold;
    }
    if let Some(padding) = parse("VOXY_VAD_PREFIX_PADDING_MS")? {
        config.turn_detection.prefix_padding_ms = padding;
    }
    if let Some(silence) = parse("VOXY_VAD_SILENCE_MS")? {
        config.turn_detection.silence_duration_ms = silence;
    }

    if let Some(proxy_url) = var("VOXY_PROXY_URL") {
        config.credentials.proxy_url = Some(proxy_url);
    }
    if let Some(key_file) = var("VOXY_KEY_FILE") {
        config.credentials.key_file = Some(PathBuf::from(key_file));
    }
    if let Ok(prefix) = std::env::var("VOXY_KEY_PREFIX") {
        // An explicitly empty prefix disables the check
        config.credentials.required_prefix = Some(prefix).filter(|p| !p.is_empty());
    }
    if let Some(prompt) = parse_bool("VOXY_PROMPT_FOR_KEY")? {
        config.credentials.prompt = prompt;
    }

    Ok(())
}
