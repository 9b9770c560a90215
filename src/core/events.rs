//! Event bridge between the session and the UI.
//!
//! The session publishes a [`VoiceEvent`] for every protocol event a UI cares
//! about; any number of subscribers receive them through a
//! `tokio::sync::broadcast` channel. Slow subscribers lag rather than block
//! the session.
//!
//! # Example
//! ```rust,ignore
//! let mut events = session.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{}: {}", event.name(), event.text().unwrap_or_default());
//! }
//! ```

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::realtime::messages::RemoteError;

/// Subscriber queue depth before the slowest subscriber starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum VoiceEvent {
    /// The remote acknowledged the session configuration
    SessionReady,

    /// Final transcript of the user's speech
    UserTranscript {
        /// Transcribed text
        text: String,
    },

    /// Incremental transcript of the user's speech
    UserTranscriptPartial {
        /// Transcript delta
        text: String,
    },

    /// Final transcript of the assistant's reply
    AssistantTranscript {
        /// Full reply text
        text: String,
    },

    /// Assistant transcript accumulated so far
    AssistantTranscriptPartial {
        /// Accumulated text
        text: String,
    },

    /// The assistant finished sending audio for a response
    ResponseComplete,

    /// Server VAD detected the user speaking
    UserSpeaking,

    /// Server VAD detected the user stopped speaking
    UserStopped,

    /// The remote reported an error; the session stays connected
    Error {
        /// Remote error payload
        error: RemoteError,
    },

    /// The connection closed
    Disconnected,
}

impl VoiceEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            VoiceEvent::SessionReady => "session-ready",
            VoiceEvent::UserTranscript { .. } => "user-transcript",
            VoiceEvent::UserTranscriptPartial { .. } => "user-transcript-partial",
            VoiceEvent::AssistantTranscript { .. } => "assistant-transcript",
            VoiceEvent::AssistantTranscriptPartial { .. } => "assistant-transcript-partial",
            VoiceEvent::ResponseComplete => "response-complete",
            VoiceEvent::UserSpeaking => "user-speaking",
            VoiceEvent::UserStopped => "user-stopped",
            VoiceEvent::Error { .. } => "error",
            VoiceEvent::Disconnected => "disconnected",
        }
    }

    /// Transcript text carried by the event, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            VoiceEvent::UserTranscript { text }
            | VoiceEvent::UserTranscriptPartial { text }
            | VoiceEvent::AssistantTranscript { text }
            | VoiceEvent::AssistantTranscriptPartial { text } => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for VoiceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceEvent::Error { error } => write!(f, "{}: {}", self.name(), error),
            _ => match self.text() {
                Some(text) => write!(f, "{}: {}", self.name(), text),
                None => write!(f, "{}", self.name()),
            },
        }
    }
}

/// Fan-out of [`VoiceEvent`]s to every subscriber.
#[derive(Debug, Clone)]
pub struct EventBridge {
    sender: broadcast::Sender<VoiceEvent>,
}

impl EventBridge {
    /// Create a bridge with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Create a bridge buffering up to `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: VoiceEvent) {
        trace!("Publishing {}", event.name());
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(VoiceEvent::SessionReady.name(), "session-ready");
        assert_eq!(
            VoiceEvent::AssistantTranscriptPartial {
                text: String::new()
            }
            .name(),
            "assistant-transcript-partial"
        );
        assert_eq!(VoiceEvent::UserSpeaking.name(), "user-speaking");
        assert_eq!(VoiceEvent::Disconnected.name(), "disconnected");
    }

    #[test]
    fn test_event_serialization_uses_names() {
        let json = serde_json::to_value(VoiceEvent::UserTranscript {
            text: "salut".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "user-transcript");
        assert_eq!(json["text"], "salut");

        let json = serde_json::to_value(VoiceEvent::ResponseComplete).unwrap();
        assert_eq!(json["event"], VoiceEvent::ResponseComplete.name());
    }

    #[test]
    fn test_event_text_and_display() {
        let event = VoiceEvent::AssistantTranscript {
            text: "Bună!".to_string(),
        };
        assert_eq!(event.text(), Some("Bună!"));
        assert_eq!(event.to_string(), "assistant-transcript: Bună!");
        assert_eq!(VoiceEvent::UserStopped.text(), None);
        assert_eq!(VoiceEvent::UserStopped.to_string(), "user-stopped");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bridge = EventBridge::new();
        assert_eq!(bridge.subscriber_count(), 0);
        bridge.publish(VoiceEvent::SessionReady);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_in_order() {
        let bridge = EventBridge::new();
        let mut first = bridge.subscribe();
        let mut second = bridge.subscribe();

        bridge.publish(VoiceEvent::UserSpeaking);
        bridge.publish(VoiceEvent::UserStopped);

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await.unwrap(), VoiceEvent::UserSpeaking);
            assert_eq!(rx.recv().await.unwrap(), VoiceEvent::UserStopped);
        }
    }
}
