//! Realtime API WebSocket message types.
//!
//! Client events (sent to server):
//! - session.update - Configure the session right after the socket opens
//! - input_audio_buffer.append - Stream one encoded microphone frame
//! - conversation.item.create - Inject the greeting prompt as a user message
//! - response.create - Ask the assistant to respond
//!
//! Server events (received from server):
//! - session.created / session.updated
//! - conversation.item.input_audio_transcription.delta / .completed
//! - response.audio_transcript.delta / .done
//! - response.audio.delta / .done
//! - input_audio_buffer.speech_started / .speech_stopped
//! - error
//!
//! Every other tag deserializes to [`ServerEvent::Unknown`] and is ignored.
//! The GA names of the audio events (`response.output_audio.*`) are accepted
//! as aliases.

use serde::{Deserialize, Deserializer, Serialize};

use super::config::{AudioFormat, Modality};
use crate::config::VoiceConfig;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent with `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    pub modalities: Vec<Modality>,

    /// System instructions for the assistant
    pub instructions: String,

    /// Voice for audio output
    pub voice: String,

    /// Input audio format
    pub input_audio_format: AudioFormat,

    /// Output audio format
    pub output_audio_format: AudioFormat,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    pub turn_detection: TurnDetection,

    /// Temperature for response generation
    pub temperature: f32,

    /// Maximum response output tokens
    pub max_response_output_tokens: u32,
}

impl SessionConfig {
    /// Build the session configuration negotiated for `config`.
    pub fn from_voice_config(config: &VoiceConfig) -> Self {
        let turn = &config.turn_detection;
        Self {
            modalities: vec![Modality::Text, Modality::Audio],
            instructions: config.instructions.clone(),
            voice: config.voice.as_str().to_string(),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: Some(InputAudioTranscription {
                model: config.transcription_model.clone(),
            }),
            turn_detection: TurnDetection::ServerVad {
                threshold: turn.threshold,
                prefix_padding_ms: turn.prefix_padding_ms,
                silence_duration_ms: turn.silence_duration_ms,
            },
            temperature: config.temperature,
            max_response_output_tokens: config.max_response_output_tokens,
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        threshold: f32,
        /// Audio prefix padding in ms
        prefix_padding_ms: u32,
        /// Silence duration in ms
        silence_duration_ms: u32,
    },
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A user message carrying a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
            }],
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Create an audio append event from an already encoded frame.
    pub fn audio_append(audio: String) -> Self {
        ClientEvent::InputAudioBufferAppend { audio }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The `type` tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the Realtime API.
///
/// Only the fields the session acts on are modelled; everything else in the
/// payload is ignored. Identifier fields default to empty so that a sparse
/// message still dispatches.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details; empty when the payload is missing or malformed
        #[serde(default, deserialize_with = "lenient_remote_error")]
        error: RemoteError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        #[serde(default)]
        session: SessionInfo,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        #[serde(default)]
        session: SessionInfo,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: String,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: String,
    },

    /// Input audio transcription delta
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta {
        /// Item ID
        #[serde(default)]
        item_id: String,
        /// Transcript delta
        #[serde(default)]
        delta: String,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        #[serde(default)]
        item_id: String,
        /// Transcript text
        #[serde(default)]
        transcript: String,
    },

    /// Audio transcript delta
    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.output_audio_transcript.delta"
    )]
    AudioTranscriptDelta {
        /// Response ID
        #[serde(default)]
        response_id: String,
        /// Transcript delta
        #[serde(default)]
        delta: String,
    },

    /// Audio transcript done
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    AudioTranscriptDone {
        /// Response ID
        #[serde(default)]
        response_id: String,
        /// Full transcript
        #[serde(default)]
        transcript: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        /// Response ID
        #[serde(default)]
        response_id: String,
        /// Base64-encoded PCM16 audio
        delta: String,
    },

    /// Audio done
    #[serde(rename = "response.audio.done", alias = "response.output_audio.done")]
    AudioDone {
        /// Response ID
        #[serde(default)]
        response_id: String,
    },

    /// Any event the session does not act on
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The canonical `type` tag of this event (`None` for unknown events).
    pub fn event_type(&self) -> Option<&'static str> {
        let tag = match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::TranscriptionDelta { .. } => {
                "conversation.item.input_audio_transcription.delta"
            }
            ServerEvent::TranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone { .. } => "response.audio.done",
            ServerEvent::Unknown => return None,
        };
        Some(tag)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// Error payload reported by the remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RemoteError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Parameter that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}): {}", self.error_type, code, self.message),
            None => write!(f, "{}: {}", self.error_type, self.message),
        }
    }
}

/// Accept any `error` payload: a bare string becomes the message, anything
/// else that is not a well-formed error object becomes an empty one.
fn lenient_remote_error<'de, D>(deserializer: D) -> Result<RemoteError, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(message) => RemoteError {
            message,
            ..RemoteError::default()
        },
        other => serde_json::from_value(other).unwrap_or_default(),
    })
}

/// Session information echoed by `session.created` / `session.updated`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionInfo {
    /// Session ID
    pub id: String,
    /// Model used
    pub model: Option<String>,
    /// Voice
    pub voice: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_from_default_config() {
        let config = VoiceConfig::default();
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::from_voice_config(&config),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["modalities"], serde_json::json!(["text", "audio"]));
        assert_eq!(session["voice"], "ballad");
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["output_audio_format"], "pcm16");
        assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(session["turn_detection"]["silence_duration_ms"], 1500);
        assert_eq!(session["max_response_output_tokens"], 4096);
        let threshold = session["turn_detection"]["threshold"].as_f64().unwrap();
        assert!((threshold - 0.5).abs() < 1e-6);
        let temperature = session["temperature"].as_f64().unwrap();
        assert!((temperature - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_audio_append_serialization() {
        let json = ClientEvent::audio_append("AAAA".to_string())
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#);
    }

    #[test]
    fn test_greeting_item_serialization() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text("hello"),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["role"], "user");
        assert_eq!(value["item"]["content"][0]["type"], "input_text");
        assert_eq!(value["item"]["content"][0]["text"], "hello");
    }

    #[test]
    fn test_response_create_serialization() {
        let event = ClientEvent::ResponseCreate;
        assert_eq!(event.to_json().unwrap(), r#"{"type":"response.create"}"#);
        assert_eq!(event.event_type(), "response.create");
    }

    #[test]
    fn test_server_error_deserialization() {
        let json = r#"{
            "type": "error",
            "event_id": "evt_1",
            "error": {
                "type": "invalid_request_error",
                "code": "invalid_value",
                "message": "Test error"
            }
        }"#;
        match ServerEvent::parse(json).unwrap() {
            ServerEvent::Error { error } => {
                assert_eq!(error.error_type, "invalid_request_error");
                assert_eq!(error.code.as_deref(), Some("invalid_value"));
                assert_eq!(error.message, "Test error");
                assert_eq!(
                    error.to_string(),
                    "invalid_request_error (invalid_value): Test error"
                );
            }
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_server_error_without_usable_payload() {
        for json in [
            r#"{"type":"error","event_id":"e1"}"#,
            r#"{"type":"error","error":null}"#,
            r#"{"type":"error","error":42}"#,
            r#"{"type":"error","error":{"message":7}}"#,
        ] {
            match ServerEvent::parse(json) {
                Ok(ServerEvent::Error { error }) => assert_eq!(error, RemoteError::default()),
                other => panic!("Expected an empty error for {json}, got {other:?}"),
            }
        }

        match ServerEvent::parse(r#"{"type":"error","error":"rate limited"}"#).unwrap() {
            ServerEvent::Error { error } => assert_eq!(error.message, "rate limited"),
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_session_created_sparse_payload() {
        let event = ServerEvent::parse(r#"{"type":"session.created"}"#).unwrap();
        assert!(matches!(event, ServerEvent::SessionCreated { .. }));

        let event =
            ServerEvent::parse(r#"{"type":"session.updated","session":{"id":"sess_1","model":"m"}}"#)
                .unwrap();
        match event {
            ServerEvent::SessionUpdated { session } => assert_eq!(session.id, "sess_1"),
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_audio_delta_deserialization() {
        let json = r#"{"type":"response.audio.delta","response_id":"r1","item_id":"i1","output_index":0,"content_index":0,"delta":"AAA="}"#;
        match ServerEvent::parse(json).unwrap() {
            ServerEvent::AudioDelta { response_id, delta } => {
                assert_eq!(response_id, "r1");
                assert_eq!(delta, "AAA=");
            }
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_ga_audio_aliases() {
        let event =
            ServerEvent::parse(r#"{"type":"response.output_audio.delta","delta":"AAA="}"#).unwrap();
        assert_eq!(event.event_type(), Some("response.audio.delta"));

        let event = ServerEvent::parse(
            r#"{"type":"response.output_audio_transcript.done","transcript":"hi"}"#,
        )
        .unwrap();
        assert_eq!(event.event_type(), Some("response.audio_transcript.done"));
    }

    #[test]
    fn test_unknown_event_type() {
        let event = ServerEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
        assert_eq!(event.event_type(), None);
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(ServerEvent::parse("{not json").is_err());
        assert!(ServerEvent::parse(r#"{"no_type":1}"#).is_err());
    }
}
