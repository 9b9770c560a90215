//! Realtime speech session over WebSocket.
//!
//! # Architecture
//!
//! - [`base`]: error taxonomy, session states and the transport capabilities
//! - [`config`]: endpoint constants, voices and audio formats
//! - [`messages`]: client and server events of the realtime protocol
//! - [`connection`]: the tokio-tungstenite transport
//! - [`session`]: the state machine tying transport, capture and playback
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz, base64 inside JSON.

pub mod base;
pub mod config;
pub mod connection;
pub mod messages;
pub mod session;

pub use base::{RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeResult, SessionState};
pub use config::{
    AudioFormat, DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, Modality,
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, RealtimeVoice,
};
pub use connection::{WS_CHANNEL_CAPACITY, WebSocketConnection, WebSocketConnector};
pub use messages::{ClientEvent, RemoteError, ServerEvent, SessionConfig};
pub use session::{SessionCapabilities, SessionInput, VoiceSession};
