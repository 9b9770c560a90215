use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ConfigError, VoiceConfig};
use crate::core::audio::CaptureProfile;
use crate::core::realtime::config::RealtimeVoice;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables and defaults.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   endpoint: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-10-01"
///   voice: "ballad"
///   temperature: 0.8
///   max_response_output_tokens: 4096
///   transcription_model: "whisper-1"
///   connect_timeout_secs: 10
///   greeting_prompt: "[Start conversation - introduce yourself as Voxy]"
///
/// audio:
///   sample_rate: 24000
///   playback_speed: 0.95
///   capture_profile: "standard"
///   echo_cancellation: true
///   noise_suppression: true
///   auto_gain_control: true
///
/// turn_detection:
///   threshold: 0.5
///   prefix_padding_ms: 300
///   silence_duration_ms: 1500
///
/// credentials:
///   proxy_url: "https://voxy.example.com/proxy.php"
///   key_file: "~/.config/voxy/api_key"
///   prompt: true
///   required_prefix: "sk-"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub audio: Option<AudioYaml>,
    pub turn_detection: Option<TurnDetectionYaml>,
    pub credentials: Option<CredentialsYaml>,
}

/// Realtime session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub greeting_prompt: Option<String>,
    pub transcription_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_response_output_tokens: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
}

/// Audio settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
    pub playback_speed: Option<f64>,
    pub capture_profile: Option<CaptureProfile>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

/// Server VAD settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnDetectionYaml {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

/// Credential sources from YAML
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    pub api_key: Option<String>,
    pub proxy_url: Option<String>,
    pub key_file: Option<String>,
    pub prompt: Option<bool>,
    /// Empty string disables the prefix check
    pub required_prefix: Option<String>,
}

impl std::fmt::Debug for CredentialsYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsYaml")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("proxy_url", &self.proxy_url)
            .field("key_file", &self.key_file)
            .field("prompt", &self.prompt)
            .field("required_prefix", &self.required_prefix)
            .finish()
    }
}

/// Expand a leading `~/` against `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;

        Ok(config)
    }

    /// Overlay every value present in the file onto `config`.
    pub fn apply(self, config: &mut VoiceConfig) {
        if let Some(realtime) = self.realtime {
            if let Some(endpoint) = realtime.endpoint {
                config.endpoint = endpoint;
            }
            if let Some(model) = realtime.model {
                config.model = model;
            }
            if let Some(voice) = realtime.voice {
                config.voice = RealtimeVoice::from_str_or_default(&voice);
            }
            if let Some(instructions) = realtime.instructions {
                config.instructions = instructions;
            }
            if let Some(greeting) = realtime.greeting_prompt {
                config.greeting_prompt = greeting;
            }
            if let Some(model) = realtime.transcription_model {
                config.transcription_model = model;
            }
            if let Some(temperature) = realtime.temperature {
                config.temperature = temperature;
            }
            if let Some(tokens) = realtime.max_response_output_tokens {
                config.max_response_output_tokens = tokens;
            }
            if let Some(secs) = realtime.connect_timeout_secs {
                config.connect_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(audio) = self.audio {
            if let Some(rate) = audio.sample_rate {
                config.audio.sample_rate = rate;
            }
            if let Some(speed) = audio.playback_speed {
                config.audio.playback_speed = speed;
            }
            if let Some(profile) = audio.capture_profile {
                config.audio.capture_profile = profile;
            }
            if let Some(enabled) = audio.echo_cancellation {
                config.audio.echo_cancellation = enabled;
            }
            if let Some(enabled) = audio.noise_suppression {
                config.audio.noise_suppression = enabled;
            }
            if let Some(enabled) = audio.auto_gain_control {
                config.audio.auto_gain_control = enabled;
            }
        }

        if let Some(turn) = self.turn_detection {
            if let Some(threshold) = turn.threshold {
                config.turn_detection.threshold = threshold;
            }
            if let Some(padding) = turn.prefix_padding_ms {
                config.turn_detection.prefix_padding_ms = padding;
            }
            if let Some(silence) = turn.silence_duration_ms {
                config.turn_detection.silence_duration_ms = silence;
            }
        }

        if let Some(mut credentials) = self.credentials {
            if let Some(key) = credentials.api_key.take() {
                config.credentials.api_key = Some(key);
            }
            if let Some(proxy_url) = credentials.proxy_url.take() {
                config.credentials.proxy_url = Some(proxy_url);
            }
            if let Some(key_file) = credentials.key_file.take() {
                config.credentials.key_file = Some(expand_home(&key_file));
            }
            if let Some(prompt) = credentials.prompt {
                config.credentials.prompt = prompt;
            }
            if let Some(prefix) = credentials.required_prefix.take() {
                config.credentials.required_prefix = Some(prefix).filter(|p| !p.is_empty());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
realtime:
  endpoint: "wss://realtime.example.com/v1/realtime"
  model: "gpt-realtime-mini"
  voice: "echo"
  temperature: 0.6
  max_response_output_tokens: 1024
  connect_timeout_secs: 5

audio:
  sample_rate: 24000
  playback_speed: 1.0
  capture_profile: "constrained"
  echo_cancellation: false

turn_detection:
  threshold: 0.7
  silence_duration_ms: 900

credentials:
  api_key: "sk-yaml"
  proxy_url: "https://voxy.example.com/proxy.php"
  prompt: true
  required_prefix: ""
"#;

        let yaml_config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let mut config = VoiceConfig::default();
        yaml_config.apply(&mut config);

        assert_eq!(config.endpoint, "wss://realtime.example.com/v1/realtime");
        assert_eq!(config.model, "gpt-realtime-mini");
        assert_eq!(config.voice, RealtimeVoice::Echo);
        assert_eq!(config.temperature, 0.6);
        assert_eq!(config.max_response_output_tokens, 1024);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.audio.playback_speed, 1.0);
        assert_eq!(config.audio.capture_profile, CaptureProfile::Constrained);
        assert!(!config.audio.echo_cancellation);
        assert!(config.audio.noise_suppression);
        assert_eq!(config.turn_detection.threshold, 0.7);
        assert_eq!(config.turn_detection.prefix_padding_ms, 300);
        assert_eq!(config.turn_detection.silence_duration_ms, 900);
        assert_eq!(config.credentials.api_key.as_deref(), Some("sk-yaml"));
        assert!(config.credentials.prompt);
        assert_eq!(config.credentials.required_prefix, None);
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
audio:
  playback_speed: 0.9
"#;
        let yaml_config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(yaml_config.realtime.is_none());

        let mut config = VoiceConfig::default();
        yaml_config.apply(&mut config);
        assert_eq!(config.audio.playback_speed, 0.9);
        assert_eq!(config.model, VoiceConfig::default().model);
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("").unwrap_or_default();
        assert!(config.realtime.is_none());
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_yaml_debug_redacts_key() {
        let yaml = "credentials:\n  api_key: \"sk-super-secret\"\n";
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("voxy.yaml");
        fs::write(&path, "realtime:\n  voice: \"sage\"\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(
            config.realtime.unwrap().voice,
            Some("sage".to_string())
        );
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/voxy/key"), PathBuf::from("/etc/voxy/key"));
        assert!(!expand_home("~/voxy/key").starts_with("~"));
    }
}
