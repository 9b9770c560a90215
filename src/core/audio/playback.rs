//! Gapless playback scheduling.
//!
//! Decoded assistant audio arrives as a sequence of chunks. Each chunk becomes
//! a [`ScheduledUnit`] placed on the engine clock right after the previous
//! one, so consecutive chunks play back-to-back with neither gaps nor overlap:
//!
//! ```text
//! start  = max(engine.now(), cursor)
//! cursor = start + (samples / rate) / speed
//! ```
//!
//! The [`Player`] owns the schedule and the engine, tracks which units are
//! still audible, and halts them all on barge-in.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::realtime::{RealtimeError, RealtimeResult};

/// Default playback speed multiplier.
pub const DEFAULT_PLAYBACK_SPEED: f64 = 0.95;

static NEXT_PLAYBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one scheduled unit, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(u64);

impl PlaybackId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(NEXT_PLAYBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One chunk of decoded audio placed on the engine clock.
#[derive(Debug, Clone)]
pub struct ScheduledUnit {
    /// Unit identifier
    pub id: PlaybackId,
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Source sample rate in Hz
    pub sample_rate: u32,
    /// Speed multiplier (`< 1.0` plays slower)
    pub speed: f64,
    /// Start time in engine-clock seconds
    pub start: f64,
    /// Audible span in engine-clock seconds
    pub duration: f64,
}

impl ScheduledUnit {
    /// End time in engine-clock seconds.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

// =============================================================================
// Schedule
// =============================================================================

/// Placement of a unit that has not been committed yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    /// Start time in engine-clock seconds
    pub start: f64,
    /// Audible span in engine-clock seconds
    pub duration: f64,
}

/// The playback cursor and the set of units still audible.
///
/// Committed units never overlap: each starts no earlier than the end of the
/// one committed before it.
#[derive(Debug, Clone)]
pub struct PlaybackSchedule {
    next_start: f64,
    speed: f64,
    active: Vec<PlaybackId>,
}

impl PlaybackSchedule {
    /// Create an empty schedule at `speed`.
    pub fn new(speed: f64) -> Self {
        Self {
            next_start: 0.0,
            speed,
            active: Vec::new(),
        }
    }

    /// Where a chunk of `sample_count` samples at `sample_rate` would play.
    pub fn next_slot(&self, now: f64, sample_count: usize, sample_rate: u32) -> Slot {
        let start = now.max(self.next_start);
        let seconds = sample_count as f64 / f64::from(sample_rate.max(1));
        Slot {
            start,
            duration: seconds / self.speed,
        }
    }

    /// Record `id` as playing in `slot` and advance the cursor past it.
    pub fn commit(&mut self, id: PlaybackId, slot: Slot) {
        self.next_start = slot.start + slot.duration;
        self.active.push(id);
    }

    /// Forget a finished unit. Returns `false` for ids not in the active set.
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        match self.active.iter().position(|active| *active == id) {
            Some(index) => {
                self.active.remove(index);
                true
            }
            None => false,
        }
    }

    /// Empty the active set and pull the cursor back to `now`.
    pub fn halt(&mut self, now: f64) -> Vec<PlaybackId> {
        self.next_start = now;
        std::mem::take(&mut self.active)
    }

    /// Return to the initial state.
    pub fn reset(&mut self) {
        self.next_start = 0.0;
        self.active.clear();
    }

    /// Start time for the next unit if the engine clock were at zero.
    pub fn cursor(&self) -> f64 {
        self.next_start
    }

    /// Speed multiplier.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Active units in scheduling order.
    pub fn active(&self) -> &[PlaybackId] {
        &self.active
    }
}

impl Default for PlaybackSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYBACK_SPEED)
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Channel end an engine reports finished units into.
pub type CompletionSender = mpsc::UnboundedSender<PlaybackId>;

/// An open audio output with its own monotonic clock.
///
/// `play` must not block; the engine reports each unit that finishes on its
/// own through the completion channel it was opened with. Units stopped via
/// `stop` or `close` need not be reported.
pub trait PlaybackEngine: Send {
    /// Current engine-clock time in seconds.
    fn now(&self) -> f64;

    /// Start `unit` at `unit.start`.
    fn play(&mut self, unit: ScheduledUnit) -> RealtimeResult<()>;

    /// Silence one unit immediately.
    fn stop(&mut self, id: PlaybackId);

    /// Silence everything and release the output.
    fn close(&mut self);
}

/// Opens playback engines on a speaker (or anything pretending to be one).
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Open an engine running at `sample_rate`.
    async fn open(
        &self,
        sample_rate: u32,
        completions: CompletionSender,
    ) -> RealtimeResult<Box<dyn PlaybackEngine>>;
}

// =============================================================================
// Player
// =============================================================================

/// Decoder-side player: owns the engine (opened lazily) and the schedule.
pub struct Player {
    sink: Arc<dyn AudioSink>,
    engine: Option<Box<dyn PlaybackEngine>>,
    schedule: PlaybackSchedule,
    sample_rate: u32,
    completions_tx: CompletionSender,
    completions_rx: mpsc::UnboundedReceiver<PlaybackId>,
}

impl Player {
    /// Create a player that schedules `sample_rate` audio at `speed`.
    pub fn new(sink: Arc<dyn AudioSink>, sample_rate: u32, speed: f64) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            sink,
            engine: None,
            schedule: PlaybackSchedule::new(speed),
            sample_rate,
            completions_tx,
            completions_rx,
        }
    }

    /// Open the engine if it is not open yet.
    pub async fn ensure_engine(&mut self) -> RealtimeResult<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        info!("Opening playback engine at {}Hz", self.sample_rate);
        let engine = self
            .sink
            .open(self.sample_rate, self.completions_tx.clone())
            .await?;
        self.engine = Some(engine);
        Ok(())
    }

    /// Schedule decoded samples right after whatever is already queued.
    ///
    /// Returns `None` for an empty chunk.
    pub async fn enqueue(&mut self, samples: Vec<f32>) -> RealtimeResult<Option<PlaybackId>> {
        if samples.is_empty() {
            return Ok(None);
        }
        self.ensure_engine().await?;
        let engine = self.engine.as_mut().ok_or(RealtimeError::NotConnected)?;

        let slot = self
            .schedule
            .next_slot(engine.now(), samples.len(), self.sample_rate);
        let id = PlaybackId::next();
        engine.play(ScheduledUnit {
            id,
            samples,
            sample_rate: self.sample_rate,
            speed: self.schedule.speed(),
            start: slot.start,
            duration: slot.duration,
        })?;
        self.schedule.commit(id, slot);

        debug!(
            "Scheduled unit {} at {:.3}s for {:.3}s ({} active)",
            id,
            slot.start,
            slot.duration,
            self.schedule.active().len()
        );
        Ok(Some(id))
    }

    /// Handle a completion notification. Stale ids are ignored.
    pub fn on_completed(&mut self, id: PlaybackId) -> bool {
        self.schedule.complete(id)
    }

    /// Barge-in: stop every active unit. Returns how many were stopped.
    pub fn halt(&mut self) -> usize {
        let now = self.engine.as_ref().map_or(0.0, |engine| engine.now());
        let halted = self.schedule.halt(now);
        if let Some(engine) = self.engine.as_mut() {
            for id in &halted {
                engine.stop(*id);
            }
        }
        if !halted.is_empty() {
            debug!("Halted {} playback unit(s)", halted.len());
        }
        halted.len()
    }

    /// Halt everything, close the engine and reset the cursor.
    pub fn close(&mut self) {
        self.halt();
        if let Some(mut engine) = self.engine.take() {
            info!("Closing playback engine");
            engine.close();
        }
        self.schedule.reset();
    }

    /// Wait for the next completion notification.
    pub async fn next_completion(&mut self) -> Option<PlaybackId> {
        self.completions_rx.recv().await
    }

    /// Whether an engine is open.
    pub fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    /// Number of units still audible.
    pub fn active_count(&self) -> usize {
        self.schedule.active().len()
    }

    /// Active units in scheduling order.
    pub fn active_ids(&self) -> &[PlaybackId] {
        self.schedule.active()
    }

    /// The playback cursor.
    pub fn cursor(&self) -> f64 {
        self.schedule.cursor()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
        }
    }
}

// =============================================================================
// Headless Sink
// =============================================================================

/// Audio sink with no device behind it.
///
/// Keeps a wall clock and reports each unit finished when its span elapses,
/// so the session behaves as if audio were audible.
#[derive(Debug, Default, Clone)]
pub struct HeadlessAudioSink;

struct HeadlessEngine {
    origin: Instant,
    completions: CompletionSender,
    timers: HashMap<PlaybackId, JoinHandle<()>>,
}

impl PlaybackEngine for HeadlessEngine {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn play(&mut self, unit: ScheduledUnit) -> RealtimeResult<()> {
        let wait = (unit.end() - self.now()).max(0.0);
        let wait = std::time::Duration::try_from_secs_f64(wait).map_err(|e| {
            RealtimeError::Unsupported(format!("Cannot schedule {wait}s of playback: {e}"))
        })?;
        let completions = self.completions.clone();
        let id = unit.id;
        self.timers.retain(|_, timer| !timer.is_finished());
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = completions.send(id);
        });
        self.timers.insert(id, timer);
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
        }
    }

    fn close(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

impl Drop for HeadlessEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl AudioSink for HeadlessAudioSink {
    async fn open(
        &self,
        sample_rate: u32,
        completions: CompletionSender,
    ) -> RealtimeResult<Box<dyn PlaybackEngine>> {
        if sample_rate == 0 {
            warn!("Refusing to open headless playback at 0Hz");
            return Err(RealtimeError::Unsupported(
                "sample rate must be non-zero".to_string(),
            ));
        }
        Ok(Box::new(HeadlessEngine {
            origin: Instant::now(),
            completions,
            timers: HashMap::new(),
        }))
    }
}
