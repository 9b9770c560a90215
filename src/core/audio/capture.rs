//! Microphone capture.
//!
//! An [`AudioSource`] opens a [`CaptureStream`] that pushes fixed-size mono
//! [`AudioFrame`]s into an unbounded channel. The push never blocks, so the
//! device callback returns immediately and the session consumes frames on its
//! own turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AudioSettings;
use crate::core::realtime::RealtimeResult;

/// One fixed-length block of mono float samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a new frame.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Frame duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

// =============================================================================
// Capture Profile
// =============================================================================

/// Capture frame size selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureProfile {
    /// 4096-sample frames
    #[default]
    Standard,
    /// 2048-sample frames for constrained (mobile) hosts
    Constrained,
}

impl CaptureProfile {
    /// Samples per frame.
    #[inline]
    pub fn frame_size(&self) -> usize {
        match self {
            Self::Standard => 4096,
            Self::Constrained => 2048,
        }
    }

    /// Convert to the configuration value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Constrained => "constrained",
        }
    }

    /// Parse from string, falling back to `Standard`.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "constrained" | "mobile" => Self::Constrained,
            _ => Self::Standard,
        }
    }
}

impl std::fmt::Display for CaptureProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Capture Configuration
// =============================================================================

/// Parameters for opening a capture stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Target sample rate in Hz
    pub sample_rate: u32,
    /// Channel count delivered to the session (always 1)
    pub channels: u16,
    /// Samples per frame
    pub frame_size: usize,
    /// Ask the platform for echo cancellation
    pub echo_cancellation: bool,
    /// Ask the platform for noise suppression
    pub noise_suppression: bool,
    /// Ask the platform for automatic gain control
    pub auto_gain_control: bool,
}

impl CaptureConfig {
    /// Build from the configured audio settings.
    pub fn from_settings(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: 1,
            frame_size: settings.capture_profile.frame_size(),
            echo_cancellation: settings.echo_cancellation,
            noise_suppression: settings.noise_suppression,
            auto_gain_control: settings.auto_gain_control,
        }
    }

    /// Wall-clock duration of one frame.
    pub fn frame_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.sample_rate))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_settings(&AudioSettings::default())
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Channel end a capture stream pushes frames into.
pub type FrameSender = mpsc::UnboundedSender<AudioFrame>;

/// A running capture stream.
pub trait CaptureStream: Send {
    /// Stop capturing and release the device. Must be idempotent.
    fn stop(&mut self);
}

/// Opens capture streams on a microphone (or anything pretending to be one).
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Open a stream delivering frames shaped by `config` into `frames`.
    ///
    /// Errors are `PermissionDenied`, `DeviceNotFound` or `Unsupported`.
    async fn open(
        &self,
        config: &CaptureConfig,
        frames: FrameSender,
    ) -> RealtimeResult<Box<dyn CaptureStream>>;
}

// =============================================================================
// Frame Accumulator
// =============================================================================

/// Turns device callback buffers of arbitrary length, channel count and rate
/// into fixed-size mono frames at the target rate.
#[derive(Debug)]
pub struct FrameAccumulator {
    input_rate: u32,
    input_channels: u16,
    target_rate: u32,
    frame_size: usize,
    /// Fractional read position into the mono input, for resampling
    position: f64,
    /// Last mono input sample of the previous buffer
    previous: f32,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    /// Create an accumulator for a device delivering `input_channels`
    /// interleaved channels at `input_rate`.
    pub fn new(input_rate: u32, input_channels: u16, config: &CaptureConfig) -> Self {
        Self {
            input_rate: input_rate.max(1),
            input_channels: input_channels.max(1),
            target_rate: config.sample_rate.max(1),
            frame_size: config.frame_size.max(1),
            position: 0.0,
            previous: 0.0,
            pending: Vec::with_capacity(config.frame_size),
        }
    }

    /// Feed one interleaved device buffer; returns every frame completed by it.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<Vec<f32>> {
        let mono = self.downmix(interleaved);
        if self.input_rate == self.target_rate {
            self.pending.extend_from_slice(&mono);
        } else {
            self.resample_into_pending(&mono);
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    fn downmix(&self, interleaved: &[f32]) -> Vec<f32> {
        let channels = usize::from(self.input_channels);
        if channels == 1 {
            return interleaved.to_vec();
        }
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }

    /// Linear interpolation. `position` indexes a virtual stream where index
    /// `-1` is the last sample of the previous buffer.
    fn resample_into_pending(&mut self, mono: &[f32]) {
        if mono.is_empty() {
            return;
        }
        let step = f64::from(self.input_rate) / f64::from(self.target_rate);
        let len = mono.len() as f64;
        while self.position < len - 1.0 {
            let base = self.position.floor();
            let frac = (self.position - base) as f32;
            let idx = base as isize;
            let a = if idx < 0 {
                self.previous
            } else {
                mono[idx as usize]
            };
            let b = mono[(idx + 1) as usize];
            self.pending.push(a + (b - a) * frac);
            self.position += step;
        }
        self.position -= len;
        self.previous = mono[mono.len() - 1];
    }
}

// =============================================================================
// Silent Source
// =============================================================================

/// Audio source that produces silence at real-time pace.
///
/// Used when no host audio backend is compiled in.
#[derive(Debug, Default, Clone)]
pub struct SilentAudioSource;

struct SilentCaptureStream {
    cancel: CancellationToken,
}

impl CaptureStream for SilentCaptureStream {
    fn stop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Stopping silent capture stream");
            self.cancel.cancel();
        }
    }
}

impl Drop for SilentCaptureStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl AudioSource for SilentAudioSource {
    async fn open(
        &self,
        config: &CaptureConfig,
        frames: FrameSender,
    ) -> RealtimeResult<Box<dyn CaptureStream>> {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let frame_size = config.frame_size;
        let sample_rate = config.sample_rate;
        let period = config.frame_duration().max(Duration::from_millis(1));

        info!(
            "Opening silent capture stream ({}Hz, {} samples per frame)",
            sample_rate, frame_size
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = AudioFrame::new(vec![0.0; frame_size], sample_rate);
                        if frames.send(frame).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Box::new(SilentCaptureStream { cancel }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: u32, frame_size: usize) -> CaptureConfig {
        CaptureConfig {
            sample_rate: rate,
            frame_size,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_capture_profile_frame_sizes() {
        assert_eq!(CaptureProfile::Standard.frame_size(), 4096);
        assert_eq!(CaptureProfile::Constrained.frame_size(), 2048);
        assert_eq!(CaptureProfile::default(), CaptureProfile::Standard);
    }

    #[test]
    fn test_capture_profile_from_str() {
        assert_eq!(
            CaptureProfile::from_str_or_default("Constrained"),
            CaptureProfile::Constrained
        );
        assert_eq!(
            CaptureProfile::from_str_or_default("mobile"),
            CaptureProfile::Constrained
        );
        assert_eq!(
            CaptureProfile::from_str_or_default("other"),
            CaptureProfile::Standard
        );
    }

    #[test]
    fn test_capture_config_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_size, 4096);
        assert!(config.echo_cancellation);
        assert!(config.noise_suppression);
        assert!(config.auto_gain_control);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 2400], 24000);
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
        assert_eq!(config(24000, 2400).frame_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_accumulator_fixed_frames() {
        let mut acc = FrameAccumulator::new(24000, 1, &config(24000, 4));
        assert!(acc.push(&[0.1, 0.2, 0.3]).is_empty());
        let frames = acc.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        let frames = acc.push(&[1.0, 1.0, 1.0]);
        assert_eq!(frames, vec![vec![0.9, 1.0, 1.0, 1.0]]);
    }

    #[test]
    fn test_accumulator_downmix() {
        let mut acc = FrameAccumulator::new(24000, 2, &config(24000, 2));
        let frames = acc.push(&[0.5, -0.5, 1.0, 0.0]);
        assert_eq!(frames, vec![vec![0.0, 0.5]]);
    }

    #[test]
    fn test_accumulator_downsample_halves_count() {
        let mut acc = FrameAccumulator::new(48000, 1, &config(24000, 100));
        let input: Vec<f32> = (0..4000).map(|i| (i % 7) as f32 / 7.0).collect();
        let mut total = 0;
        for chunk in input.chunks(480) {
            total += acc.push(chunk).iter().map(Vec::len).sum::<usize>();
        }
        // 2000 output samples expected, less the frame still pending
        assert!(total >= 1900 && total <= 2000, "got {total}");
    }

    #[test]
    fn test_accumulator_upsample_constant_signal() {
        let mut acc = FrameAccumulator::new(16000, 1, &config(24000, 30));
        let frames = acc.push(&[0.25; 100]);
        assert!(!frames.is_empty());
        for frame in frames {
            assert!(frame.iter().all(|s| (s - 0.25).abs() < 1e-6));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_source_emits_until_stopped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut stream = SilentAudioSource
            .open(&config(24000, 2400), tx)
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.samples.len(), 2400);
        assert!(frame.samples.iter().all(|s| *s == 0.0));

        stream.stop();
        stream.stop();
        // Sender is dropped once the task observes cancellation
        while rx.recv().await.is_some() {}
    }
}
