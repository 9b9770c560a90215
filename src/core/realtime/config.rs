//! OpenAI Realtime API protocol constants and enumerations.
//!
//! - Endpoint and canonical sample rate
//! - Voice selection
//! - Audio format negotiation
//! - Response modalities

use serde::{Deserialize, Serialize};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Model the widget has always shipped with.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

/// Canonical audio sample rate for the Realtime API (Hz).
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Transcription model used for the user's side of the conversation.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

// =============================================================================
// Voices
// =============================================================================

/// Available voices for the Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    /// Alloy voice
    Alloy,
    /// Ash voice
    Ash,
    /// Ballad voice (default)
    #[default]
    Ballad,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl RealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, falling back to the default voice.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::all()
            .iter()
            .copied()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or_default()
    }

    /// Get all available voices.
    pub fn all() -> &'static [RealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio formats negotiated with the Realtime API.
///
/// The session always negotiates `pcm16` in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// PCM 16-bit signed little-endian, mono
    #[default]
    Pcm16,
}

impl AudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
        }
    }

    /// Bytes per sample on the wire.
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Pcm16 => 2,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Modalities
// =============================================================================

/// Output modalities for the Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text output
    Text,
    /// Audio output
    Audio,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_as_str() {
        assert_eq!(RealtimeVoice::Alloy.as_str(), "alloy");
        assert_eq!(RealtimeVoice::Ballad.as_str(), "ballad");
    }

    #[test]
    fn test_voice_from_str() {
        assert_eq!(
            RealtimeVoice::from_str_or_default("shimmer"),
            RealtimeVoice::Shimmer
        );
        assert_eq!(
            RealtimeVoice::from_str_or_default(" VERSE "),
            RealtimeVoice::Verse
        );
        assert_eq!(
            RealtimeVoice::from_str_or_default("unknown"),
            RealtimeVoice::Ballad
        );
    }

    #[test]
    fn test_voice_serde_lowercase() {
        let json = serde_json::to_string(&RealtimeVoice::Coral).unwrap();
        assert_eq!(json, "\"coral\"");
        let voice: RealtimeVoice = serde_json::from_str("\"sage\"").unwrap();
        assert_eq!(voice, RealtimeVoice::Sage);
    }

    #[test]
    fn test_voice_all() {
        let voices = RealtimeVoice::all();
        assert_eq!(voices.len(), 8);
        assert!(voices.contains(&RealtimeVoice::Ballad));
    }

    #[test]
    fn test_audio_format() {
        assert_eq!(AudioFormat::Pcm16.as_str(), "pcm16");
        assert_eq!(AudioFormat::Pcm16.bytes_per_sample(), 2);
        assert_eq!(
            serde_json::to_string(&AudioFormat::Pcm16).unwrap(),
            "\"pcm16\""
        );
    }

    #[test]
    fn test_modality_serialization() {
        let json = serde_json::to_string(&vec![Modality::Text, Modality::Audio]).unwrap();
        assert_eq!(json, r#"["text","audio"]"#);
    }
}
