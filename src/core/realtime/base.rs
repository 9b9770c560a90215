//! Base traits and types for the realtime voice session.
//!
//! This module defines the error taxonomy shared by every component of the
//! session, the lifecycle states of the session state machine, and the
//! transport capabilities (`RealtimeConnector` / `RealtimeConnection`) that the
//! state machine drives without knowing whether it talks to a real WebSocket
//! or to an in-memory fake.
//!
//! # Audio Format
//!
//! The wire format is fixed: mono PCM 16-bit signed little-endian at 24kHz,
//! base64 encoded inside JSON control messages.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::core::credentials::Credential;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime voice operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// No credential available, or the remote rejected it
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The connection could not be opened (or did not open in time)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Malformed message or transport failure at the protocol level
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Microphone access was denied by the platform
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device was found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The platform lacks a required capability
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation invoked outside of its valid state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::SerializationError(err.to_string())
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a voice session.
///
/// `Idle → Connecting → Connected → Listening`, with `Disconnected` reachable
/// from every state. A session in `Disconnected` may connect again, which
/// starts a fresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Never connected
    #[default]
    Idle,
    /// Opening the remote connection
    Connecting,
    /// Connected, microphone not streaming
    Connected,
    /// Connected and streaming microphone audio
    Listening,
    /// Connection closed (by the caller or the remote)
    Disconnected,
}

impl SessionState {
    /// Whether a remote connection is open in this state.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Listening)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// =============================================================================
// Transport Capabilities
// =============================================================================

/// An open, bidirectional, message-oriented connection to a realtime speech
/// endpoint. Messages are JSON text frames.
#[async_trait]
pub trait RealtimeConnection: Send {
    /// Queue a text message for sending. Messages are delivered in call order.
    async fn send(&mut self, message: String) -> RealtimeResult<()>;

    /// Wait for the next inbound text message.
    ///
    /// Returns `None` once the connection has closed cleanly, and
    /// `Some(Err(_))` for a transport failure (after which the connection is
    /// unusable).
    async fn recv(&mut self) -> Option<RealtimeResult<String>>;

    /// Close the connection and release its resources.
    async fn close(&mut self);
}

/// Opens `RealtimeConnection`s.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Open a connection to `url`, authenticating with `credential`.
    async fn connect(
        &self,
        url: &str,
        credential: &Credential,
    ) -> RealtimeResult<Box<dyn RealtimeConnection>>;
}
