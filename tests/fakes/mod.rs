//! In-memory fakes for the session capabilities.
//!
//! - [`FakeConnector`] hands out [`FakeConnection`]s and keeps the matching
//!   [`FakeServer`] end so a test can script the remote
//! - [`FakeAudioSource`] counts opened streams and lets a test push frames
//! - [`FakeAudioSink`] runs on a manual clock and records every unit

// Not every scenario file uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use voxy_voice::config::VoiceConfig;
use voxy_voice::core::audio::{
    AudioFrame, AudioSink, AudioSource, CaptureConfig, CaptureStream, CompletionSender,
    FrameSender, PlaybackEngine, PlaybackId, ScheduledUnit, encode_frame_base64,
};
use voxy_voice::core::credentials::{Credential, CredentialProvider};
use voxy_voice::core::realtime::{
    RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeResult, SessionCapabilities,
    VoiceSession,
};

// =============================================================================
// Credentials
// =============================================================================

/// Returns a fixed key, or nothing.
pub struct FakeCredentials {
    key: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeCredentials {
    pub fn with_key(key: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            key: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn credential(&self) -> RealtimeResult<Option<Credential>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.key.as_deref().map(Credential::new))
    }
}

// =============================================================================
// Connection
// =============================================================================

/// How the next `connect` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Accept,
    Refuse,
    RejectCredential,
    Hang,
}

/// Remote end of a [`FakeConnection`].
pub struct FakeServer {
    received: mpsc::UnboundedReceiver<String>,
    push: Option<mpsc::UnboundedSender<RealtimeResult<String>>>,
    closed: Arc<AtomicBool>,
    pub url: String,
    pub credential: String,
}

impl FakeServer {
    /// Send one server event.
    pub fn send(&self, event: Value) {
        if let Some(push) = &self.push {
            let _ = push.send(Ok(event.to_string()));
        }
    }

    /// Send raw text.
    pub fn send_raw(&self, text: &str) {
        if let Some(push) = &self.push {
            let _ = push.send(Ok(text.to_string()));
        }
    }

    /// Close from the remote side.
    pub fn hang_up(&mut self) {
        self.push = None;
    }

    /// Fail the transport.
    pub fn fail(&mut self, error: RealtimeError) {
        if let Some(push) = self.push.take() {
            let _ = push.send(Err(error));
        }
    }

    /// Every client message received so far, parsed.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(text) = self.received.try_recv() {
            messages.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        messages
    }

    /// `type` tags of every client message received so far.
    pub fn drain_types(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .map(|message| message["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Whether the client closed the connection.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConnection {
    sent: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<RealtimeResult<String>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RealtimeConnection for FakeConnection {
    async fn send(&mut self, message: String) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        self.sent
            .send(message)
            .map_err(|_| RealtimeError::NotConnected)
    }

    async fn recv(&mut self) -> Option<RealtimeResult<String>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.close();
    }
}

/// Connector whose behaviour is set per test.
pub struct FakeConnector {
    mode: Mutex<ConnectMode>,
    servers: Mutex<Vec<FakeServer>>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(mode: ConnectMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            servers: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        *self.mode.lock() = mode;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Server end of the most recent accepted connection.
    pub fn take_server(&self) -> FakeServer {
        self.servers
            .lock()
            .pop()
            .expect("no connection was accepted")
    }
}

#[async_trait]
impl RealtimeConnector for FakeConnector {
    async fn connect(
        &self,
        url: &str,
        credential: &Credential,
    ) -> RealtimeResult<Box<dyn RealtimeConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();
        match mode {
            ConnectMode::Accept => {}
            ConnectMode::Refuse => {
                return Err(RealtimeError::ConnectionFailed("connection refused".into()));
            }
            ConnectMode::RejectCredential => {
                return Err(RealtimeError::AuthenticationFailed(
                    "Handshake rejected with 401 Unauthorized".into(),
                ));
            }
            ConnectMode::Hang => std::future::pending::<()>().await,
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        self.servers.lock().push(FakeServer {
            received: sent_rx,
            push: Some(push_tx),
            closed: closed.clone(),
            url: url.to_string(),
            credential: credential.expose().to_string(),
        });

        Ok(Box::new(FakeConnection {
            sent: sent_tx,
            inbound: push_rx,
            closed,
        }))
    }
}

// =============================================================================
// Capture
// =============================================================================

#[derive(Default)]
struct SourceState {
    opened: usize,
    active: usize,
    last_config: Option<CaptureConfig>,
    frames: Option<FrameSender>,
    fail_next: Option<fn() -> RealtimeError>,
}

/// Microphone stand-in.
#[derive(Clone, Default)]
pub struct FakeAudioSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail.
    pub fn fail_next(&self, error: fn() -> RealtimeError) {
        self.state.lock().fail_next = Some(error);
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Streams opened and not yet stopped.
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    pub fn last_config(&self) -> Option<CaptureConfig> {
        self.state.lock().last_config.clone()
    }

    /// Deliver a frame as the device callback would.
    pub fn push_frame(&self, samples: Vec<f32>) {
        let state = self.state.lock();
        if let Some(frames) = &state.frames {
            let _ = frames.send(AudioFrame::new(samples, 24000));
        }
    }
}

struct FakeCaptureStream {
    state: Arc<Mutex<SourceState>>,
    stopped: bool,
}

impl CaptureStream for FakeCaptureStream {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            let mut state = self.state.lock();
            state.active -= 1;
            state.frames = None;
        }
    }
}

#[async_trait]
impl AudioSource for FakeAudioSource {
    async fn open(
        &self,
        config: &CaptureConfig,
        frames: FrameSender,
    ) -> RealtimeResult<Box<dyn CaptureStream>> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next.take() {
            return Err(error());
        }
        state.opened += 1;
        state.active += 1;
        state.last_config = Some(config.clone());
        state.frames = Some(frames);
        Ok(Box::new(FakeCaptureStream {
            state: self.state.clone(),
            stopped: false,
        }))
    }
}

// =============================================================================
// Playback
// =============================================================================

#[derive(Default)]
struct SinkState {
    now: f64,
    opened: usize,
    closed: usize,
    played: Vec<ScheduledUnit>,
    stopped: Vec<PlaybackId>,
    completions: Option<CompletionSender>,
    fail_open: bool,
}

/// Speaker stand-in with a clock the test advances.
#[derive(Clone, Default)]
pub struct FakeAudioSink {
    state: Arc<Mutex<SinkState>>,
}

impl FakeAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_now(&self, now: f64) {
        self.state.lock().now = now;
    }

    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    pub fn played(&self) -> Vec<ScheduledUnit> {
        self.state.lock().played.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.state.lock().stopped.clone()
    }

    /// Report `id` finished, as the engine would.
    pub fn complete(&self, id: PlaybackId) {
        if let Some(completions) = &self.state.lock().completions {
            let _ = completions.send(id);
        }
    }
}

struct FakeEngine {
    state: Arc<Mutex<SinkState>>,
}

impl PlaybackEngine for FakeEngine {
    fn now(&self) -> f64 {
        self.state.lock().now
    }

    fn play(&mut self, unit: ScheduledUnit) -> RealtimeResult<()> {
        self.state.lock().played.push(unit);
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.state.lock().stopped.push(id);
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.closed += 1;
        state.completions = None;
    }
}

#[async_trait]
impl AudioSink for FakeAudioSink {
    async fn open(
        &self,
        _sample_rate: u32,
        completions: CompletionSender,
    ) -> RealtimeResult<Box<dyn PlaybackEngine>> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(RealtimeError::Unsupported("no output device".into()));
        }
        state.opened += 1;
        state.completions = Some(completions);
        Ok(Box::new(FakeEngine {
            state: self.state.clone(),
        }))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A session wired to fakes, plus handles on each fake.
pub struct Harness {
    pub session: VoiceSession,
    pub connector: Arc<FakeConnector>,
    pub credentials: Arc<FakeCredentials>,
    pub source: FakeAudioSource,
    pub sink: FakeAudioSink,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(VoiceConfig::default(), FakeCredentials::with_key("sk-test-key"))
    }

    pub fn with(config: VoiceConfig, credentials: FakeCredentials) -> Self {
        let connector = Arc::new(FakeConnector::new(ConnectMode::Accept));
        let credentials = Arc::new(credentials);
        let source = FakeAudioSource::new();
        let sink = FakeAudioSink::new();
        let session = VoiceSession::new(
            config,
            SessionCapabilities {
                connector: connector.clone(),
                credentials: credentials.clone(),
                audio_source: Arc::new(source.clone()),
                audio_sink: Arc::new(sink.clone()),
            },
        );
        Self {
            session,
            connector,
            credentials,
            source,
            sink,
        }
    }
}

// =============================================================================
// Server Event Builders
// =============================================================================

pub fn session_created(id: &str) -> Value {
    json!({
        "type": "session.created",
        "event_id": "event_1",
        "session": { "id": id, "object": "realtime.session", "model": "gpt-4o-realtime-preview-2024-10-01", "voice": "ballad" }
    })
}

/// An audio delta of `samples` samples of a constant level.
pub fn audio_delta(samples: usize, level: f32) -> Value {
    json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "item_id": "item_1",
        "output_index": 0,
        "content_index": 0,
        "delta": encode_frame_base64(&vec![level; samples]),
    })
}

pub fn speech_started() -> Value {
    json!({
        "type": "input_audio_buffer.speech_started",
        "audio_start_ms": 1200,
        "item_id": "item_2"
    })
}
