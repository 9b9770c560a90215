//! Session protocol state machine.
//!
//! [`VoiceSession`] owns the remote connection, the capture stream and the
//! player. It is driven one input at a time: [`VoiceSession::next_input`]
//! waits for whichever comes first of an inbound message, a captured frame or
//! a playback completion, and [`VoiceSession::handle_input`] runs it to
//! completion before the next one is taken. Nothing inside is locked; the
//! `&mut self` API is the serialization.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut session = VoiceSession::new(config, capabilities);
//! let mut events = session.subscribe();
//!
//! session.connect().await?;
//! session.trigger_greeting().await?;
//! session.start_listening().await?;
//!
//! while session.process_next().await {}
//! ```

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use super::base::{RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeResult, SessionState};
use super::messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig};
use crate::config::VoiceConfig;
use crate::core::audio::{
    AudioFrame, AudioSink, AudioSource, CaptureConfig, CaptureStream, PlaybackId, Player,
    decode_base64_pcm16, encode_frame_base64,
};
use crate::core::credentials::CredentialProvider;
use crate::core::events::{EventBridge, VoiceEvent};

/// The injected capabilities a session drives.
#[derive(Clone)]
pub struct SessionCapabilities {
    /// Opens the remote connection
    pub connector: Arc<dyn RealtimeConnector>,
    /// Supplies the API key
    pub credentials: Arc<dyn CredentialProvider>,
    /// Opens the microphone
    pub audio_source: Arc<dyn AudioSource>,
    /// Opens the speaker
    pub audio_sink: Arc<dyn AudioSink>,
}

/// One unit of work for the state machine.
#[derive(Debug)]
pub enum SessionInput {
    /// Inbound JSON text from the remote
    Message(String),
    /// A captured microphone frame
    Frame(AudioFrame),
    /// The engine finished playing a unit
    PlaybackFinished(PlaybackId),
    /// The remote closed (`None`) or the transport failed
    ConnectionLost(Option<RealtimeError>),
}

/// A realtime voice session.
pub struct VoiceSession {
    config: VoiceConfig,
    capture_config: CaptureConfig,
    connector: Arc<dyn RealtimeConnector>,
    credentials: Arc<dyn CredentialProvider>,
    audio_source: Arc<dyn AudioSource>,

    state: SessionState,
    connection: Option<Box<dyn RealtimeConnection>>,
    capture: Option<Box<dyn CaptureStream>>,
    frames_tx: mpsc::UnboundedSender<AudioFrame>,
    frames_rx: mpsc::UnboundedReceiver<AudioFrame>,
    player: Player,
    events: EventBridge,

    session_id: Option<String>,
    assistant_transcript: String,
}

impl VoiceSession {
    /// Create an idle session.
    pub fn new(config: VoiceConfig, capabilities: SessionCapabilities) -> Self {
        let capture_config = CaptureConfig::from_settings(&config.audio);
        let player = Player::new(
            capabilities.audio_sink,
            config.audio.sample_rate,
            config.audio.playback_speed,
        );
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        Self {
            config,
            capture_config,
            connector: capabilities.connector,
            credentials: capabilities.credentials,
            audio_source: capabilities.audio_source,
            state: SessionState::Idle,
            connection: None,
            capture: None,
            frames_tx,
            frames_rx,
            player,
            events: EventBridge::new(),
            session_id: None,
            assistant_transcript: String::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    /// Session id echoed by the remote, once known.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// The bridge events are published on.
    pub fn events(&self) -> &EventBridge {
        &self.events
    }

    /// Units currently scheduled or audible, in scheduling order.
    pub fn active_playback(&self) -> &[PlaybackId] {
        self.player.active_ids()
    }

    /// Engine time at which the next unit would start.
    pub fn playback_cursor(&self) -> f64 {
        self.player.cursor()
    }

    /// Whether a playback engine is open.
    pub fn is_playback_open(&self) -> bool {
        self.player.is_open()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Open the remote connection and configure the session.
    ///
    /// No-op when already connected. A config that fails validation is
    /// rejected with `InvalidConfiguration` before any credential lookup. On
    /// failure the session is left in the state it was in before the call
    /// with nothing open.
    pub async fn connect(&mut self) -> RealtimeResult<()> {
        if self.state.is_connected() {
            return Ok(());
        }
        self.config.validate().map_err(|e| {
            warn!("Refusing to connect: {}", e);
            RealtimeError::InvalidConfiguration(e.to_string())
        })?;

        let previous = self.state;
        self.state = SessionState::Connecting;
        info!("Connecting realtime session");

        match self.open_connection().await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.session_id = None;
                self.assistant_transcript.clear();
                self.state = SessionState::Connected;
            }
            Err(e) => {
                warn!("Failed to connect: {}", e);
                self.state = previous;
                return Err(e);
            }
        }

        let update = ClientEvent::SessionUpdate {
            session: SessionConfig::from_voice_config(&self.config),
        };
        if let Err(e) = self.send_event(&update).await {
            warn!("Failed to send session configuration: {}", e);
            self.close_connection().await;
            self.state = previous;
            return Err(e);
        }

        info!(
            "Realtime session connected (model {}, voice {})",
            self.config.model, self.config.voice
        );
        Ok(())
    }

    async fn open_connection(&self) -> RealtimeResult<Box<dyn RealtimeConnection>> {
        let credential = self
            .credentials
            .credential()
            .await?
            .filter(|credential| !credential.is_empty())
            .ok_or_else(|| {
                RealtimeError::AuthenticationFailed("No API key available".to_string())
            })?;

        let url = self
            .config
            .connection_url()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        debug!("Dialing {} with credential {}", url, credential.redacted());

        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect(&url, &credential)).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::ConnectionFailed(format!(
                "Connection timed out after {}s",
                timeout.as_secs_f64()
            ))),
        }
    }

    /// Ask the assistant to speak first.
    pub async fn trigger_greeting(&mut self) -> RealtimeResult<()> {
        if !self.state.is_connected() {
            return Err(RealtimeError::InvalidState {
                operation: "trigger greeting",
                state: self.state,
            });
        }

        let item = ConversationItem::user_text(self.config.greeting_prompt.clone());
        self.send_event(&ClientEvent::ConversationItemCreate { item })
            .await?;
        self.send_event(&ClientEvent::ResponseCreate).await?;
        debug!("Greeting requested");
        Ok(())
    }

    /// Start streaming microphone audio.
    pub async fn start_listening(&mut self) -> RealtimeResult<()> {
        match self.state {
            SessionState::Listening => return Ok(()),
            SessionState::Connected => {}
            state => {
                return Err(RealtimeError::InvalidState {
                    operation: "start listening",
                    state,
                });
            }
        }

        // Frames left over from an earlier stream must not be sent
        while self.frames_rx.try_recv().is_ok() {}

        let mut stream = self
            .audio_source
            .open(&self.capture_config, self.frames_tx.clone())
            .await?;

        if let Err(e) = self.player.ensure_engine().await {
            warn!("Failed to open playback engine: {}", e);
            stream.stop();
            return Err(e);
        }

        self.capture = Some(stream);
        self.state = SessionState::Listening;
        info!(
            "Listening ({} samples per frame at {}Hz)",
            self.capture_config.frame_size, self.capture_config.sample_rate
        );
        Ok(())
    }

    /// Stop streaming microphone audio and silence playback.
    ///
    /// No-op unless listening.
    pub fn stop_listening(&mut self) {
        if self.state != SessionState::Listening {
            return;
        }
        self.release_audio();
        self.state = SessionState::Connected;
        info!("Stopped listening");
    }

    /// Tear everything down. Never fails.
    pub async fn disconnect(&mut self) {
        self.release_audio();
        let was_connected = self.close_connection().await;
        self.state = SessionState::Disconnected;
        self.session_id = None;
        self.assistant_transcript.clear();
        if was_connected {
            info!("Realtime session disconnected");
            self.events.publish(VoiceEvent::Disconnected);
        }
    }

    // =========================================================================
    // Input Loop
    // =========================================================================

    /// Wait for the next input.
    ///
    /// Returns `None` when there is no connection to wait on.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        let awaiting_completion = self.player.active_count() > 0;
        let connection = self.connection.as_mut()?;

        tokio::select! {
            message = connection.recv() => Some(match message {
                Some(Ok(text)) => SessionInput::Message(text),
                Some(Err(e)) => SessionInput::ConnectionLost(Some(e)),
                None => SessionInput::ConnectionLost(None),
            }),
            Some(frame) = self.frames_rx.recv() => Some(SessionInput::Frame(frame)),
            Some(id) = self.player.next_completion(), if awaiting_completion => {
                Some(SessionInput::PlaybackFinished(id))
            }
        }
    }

    /// Run one input to completion.
    pub async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Message(text) => self.handle_message(&text).await,
            SessionInput::Frame(frame) => self.handle_frame(frame).await,
            SessionInput::PlaybackFinished(id) => {
                if self.player.on_completed(id) {
                    trace!("Playback unit {} finished", id);
                }
            }
            SessionInput::ConnectionLost(error) => self.handle_connection_lost(error).await,
        }
    }

    /// Wait for and handle one input. Returns `false` once disconnected.
    pub async fn process_next(&mut self) -> bool {
        match self.next_input().await {
            Some(input) => {
                self.handle_input(input).await;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn handle_frame(&mut self, frame: AudioFrame) {
        if self.state != SessionState::Listening {
            trace!("Dropping frame captured while {}", self.state);
            return;
        }
        let audio = encode_frame_base64(&frame.samples);
        if let Err(e) = self.send_event(&ClientEvent::audio_append(audio)).await {
            warn!("Failed to send audio frame: {}", e);
            self.handle_connection_lost(Some(e)).await;
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to parse server event: {}", e);
                return;
            }
        };

        match event {
            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                info!(
                    "Session ready: {} (model {})",
                    session.id,
                    session.model.as_deref().unwrap_or("unknown")
                );
                if !session.id.is_empty() {
                    self.session_id = Some(session.id);
                }
                self.events.publish(VoiceEvent::SessionReady);
            }

            ServerEvent::TranscriptionDelta { delta, .. } => {
                if !delta.is_empty() {
                    self.events
                        .publish(VoiceEvent::UserTranscriptPartial { text: delta });
                }
            }

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                if transcript.trim().is_empty() {
                    debug!("Empty user transcript");
                    return;
                }
                debug!("User said: {}", transcript);
                self.events
                    .publish(VoiceEvent::UserTranscript { text: transcript });
            }

            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                self.assistant_transcript.push_str(&delta);
                self.events.publish(VoiceEvent::AssistantTranscriptPartial {
                    text: self.assistant_transcript.clone(),
                });
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                let accumulated = std::mem::take(&mut self.assistant_transcript);
                let text = if transcript.is_empty() {
                    accumulated
                } else {
                    transcript
                };
                if !text.trim().is_empty() {
                    debug!("Assistant said: {}", text);
                    self.events.publish(VoiceEvent::AssistantTranscript { text });
                }
            }

            ServerEvent::AudioDelta { delta, .. } => match decode_base64_pcm16(&delta) {
                Ok(samples) => {
                    if let Err(e) = self.player.enqueue(samples).await {
                        warn!("Failed to schedule playback: {}", e);
                    }
                }
                Err(e) => warn!("Dropping audio delta: {}", e),
            },

            ServerEvent::AudioDone { .. } => {
                debug!("Response audio complete");
                self.events.publish(VoiceEvent::ResponseComplete);
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                let halted = self.player.halt();
                debug!(
                    "User started speaking at {}ms, halted {} unit(s)",
                    audio_start_ms, halted
                );
                self.events.publish(VoiceEvent::UserSpeaking);
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                debug!("User stopped speaking at {}ms", audio_end_ms);
                self.events.publish(VoiceEvent::UserStopped);
            }

            ServerEvent::Error { error } => {
                warn!("Remote error: {}", error);
                self.events.publish(VoiceEvent::Error { error });
            }

            ServerEvent::Unknown => {
                trace!("Ignoring unhandled server event");
            }
        }
    }

    async fn handle_connection_lost(&mut self, error: Option<RealtimeError>) {
        match &error {
            Some(e) => warn!("Realtime connection lost: {}", e),
            None => info!("Realtime connection closed by remote"),
        }
        self.release_audio();
        let was_connected = self.close_connection().await;
        self.state = SessionState::Disconnected;
        self.assistant_transcript.clear();
        if was_connected {
            self.events.publish(VoiceEvent::Disconnected);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn send_event(&mut self, event: &ClientEvent) -> RealtimeResult<()> {
        let connection = self.connection.as_mut().ok_or(RealtimeError::NotConnected)?;
        let json = event.to_json()?;
        trace!("Sending {}", event.event_type());
        connection.send(json).await
    }

    /// Stop capture and close the player.
    fn release_audio(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.player.close();
    }

    /// Returns whether a connection was open.
    async fn close_connection(&mut self) -> bool {
        match self.connection.take() {
            Some(mut connection) => {
                connection.close().await;
                true
            }
            None => false,
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.release_audio();
    }
}
