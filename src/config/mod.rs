//! Configuration module for the Voxy voice session
//!
//! This module builds a [`VoiceConfig`] from various sources: .env files, YAML
//! files, and environment variables. Priority: YAML > ENV vars > .env values >
//! defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable overrides
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voxy_voice::config::VoiceConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = VoiceConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("voxy.yaml");
//! let config = VoiceConfig::from_file(&config_path)?;
//!
//! println!("Connecting to {}", config.connection_url()?);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::{CaptureProfile, DEFAULT_PLAYBACK_SPEED};
use crate::core::credentials::DEFAULT_KEY_PREFIX;
use crate::core::realtime::config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, RealtimeVoice,
};

/// Assistant persona sent with every `session.update`.
pub const DEFAULT_INSTRUCTIONS: &str = include_str!("voxy_instructions.txt");

/// Text injected as a user message to make the assistant speak first.
pub const DEFAULT_GREETING_PROMPT: &str = "[Start conversation - introduce yourself as Voxy]";

/// Upper bound on opening the remote connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for this schema
    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment variable holds an unparseable value
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// A setting is outside its valid range
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

// =============================================================================
// Settings
// =============================================================================

/// Audio capture and playback settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    /// Sample rate negotiated with the remote (Hz)
    pub sample_rate: u32,
    /// Playback speed multiplier
    pub playback_speed: f64,
    /// Capture frame size selection
    pub capture_profile: CaptureProfile,
    /// Echo cancellation hint for the microphone
    pub echo_cancellation: bool,
    /// Noise suppression hint for the microphone
    pub noise_suppression: bool,
    /// Automatic gain control hint for the microphone
    pub auto_gain_control: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: OPENAI_REALTIME_SAMPLE_RATE,
            playback_speed: DEFAULT_PLAYBACK_SPEED,
            capture_profile: CaptureProfile::Standard,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDetectionSettings {
    /// Activation threshold in `[0, 1]`
    pub threshold: f32,
    /// Audio kept before detected speech (ms)
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn (ms)
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 1500,
        }
    }
}

/// Where API keys come from.
#[derive(Clone, PartialEq)]
pub struct CredentialSettings {
    /// Explicit API key (highest priority)
    pub api_key: Option<String>,
    /// Site proxy answering `?action=get-api-key`
    pub proxy_url: Option<String>,
    /// Key file read before prompting, and written after
    pub key_file: Option<PathBuf>,
    /// Prompt on the terminal when every other source is empty
    pub prompt: bool,
    /// Prefix a key must carry to be accepted (`None` accepts any)
    pub required_prefix: Option<String>,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            proxy_url: None,
            key_file: None,
            prompt: false,
            required_prefix: Some(DEFAULT_KEY_PREFIX.to_string()),
        }
    }
}

impl fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("proxy_url", &self.proxy_url)
            .field("key_file", &self.key_file)
            .field("prompt", &self.prompt)
            .field("required_prefix", &self.required_prefix)
            .finish()
    }
}

/// Implement Drop to zeroize the API key when the settings are dropped.
impl Drop for CredentialSettings {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

// =============================================================================
// Voice Configuration
// =============================================================================

/// Complete configuration of one voice session.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Realtime WebSocket endpoint (without query)
    pub endpoint: String,
    /// Realtime model
    pub model: String,
    /// Assistant voice
    pub voice: RealtimeVoice,
    /// System instructions
    pub instructions: String,
    /// Text injected by `trigger_greeting`
    pub greeting_prompt: String,
    /// Model transcribing the user's speech
    pub transcription_model: String,
    /// Sampling temperature in `[0, 2]`
    pub temperature: f32,
    /// Cap on tokens per response
    pub max_response_output_tokens: u32,
    /// Upper bound on opening the connection
    pub connect_timeout: Duration,
    /// Audio settings
    pub audio: AudioSettings,
    /// Turn detection settings
    pub turn_detection: TurnDetectionSettings,
    /// Credential sources
    pub credentials: CredentialSettings,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: OPENAI_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: RealtimeVoice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            greeting_prompt: DEFAULT_GREETING_PROMPT.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            temperature: 0.8,
            max_response_output_tokens: 4096,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            audio: AudioSettings::default(),
            turn_detection: TurnDetectionSettings::default(),
            credentials: CredentialSettings::default(),
        }
    }
}

impl VoiceConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// The .env file is expected to have been loaded by the binary already.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or the resulting
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        env::apply_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::default();
        env::apply_env(&mut config)?;
        yaml_config.apply(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Check every setting against its valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_endpoint(&self.endpoint)?;
        validation::validate_non_empty("model", &self.model)?;
        validation::validate_sample_rate(self.audio.sample_rate)?;
        validation::validate_playback_speed(self.audio.playback_speed)?;
        validation::validate_threshold(self.turn_detection.threshold)?;
        validation::validate_temperature(self.temperature)?;
        validation::validate_connect_timeout(self.connect_timeout)?;
        if let Some(proxy_url) = &self.credentials.proxy_url {
            validation::validate_proxy_url(proxy_url)?;
        }
        Ok(())
    }

    /// The URL the session connects to: `{endpoint}?model={model}`.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        let mut url = url::Url::parse(&self.endpoint).map_err(|e| ConfigError::Invalid {
            field: "endpoint",
            reason: e.to_string(),
        })?;
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url.to_string())
    }
}
