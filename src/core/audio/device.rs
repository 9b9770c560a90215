//! Host audio devices through `cpal`.
//!
//! `cpal::Stream` is not `Send`, so every stream lives on a dedicated thread
//! that builds it, starts it and then parks until told to stop. The session
//! only ever holds the thread handle.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::capture::{
    AudioFrame, AudioSource, CaptureConfig, CaptureStream, FrameAccumulator, FrameSender,
};
use super::playback::{AudioSink, CompletionSender, PlaybackEngine, PlaybackId, ScheduledUnit};
use crate::core::realtime::{RealtimeError, RealtimeResult};

// =============================================================================
// Error Mapping
// =============================================================================

fn classify_backend_error(description: &str) -> RealtimeError {
    let lower = description.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        RealtimeError::PermissionDenied(description.to_string())
    } else {
        RealtimeError::Unsupported(description.to_string())
    }
}

fn map_default_config_error(err: cpal::DefaultStreamConfigError) -> RealtimeError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            RealtimeError::DeviceNotFound("audio device is no longer available".to_string())
        }
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            RealtimeError::Unsupported("device does not support this stream type".to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err } => {
            classify_backend_error(&err.description)
        }
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> RealtimeError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            RealtimeError::DeviceNotFound("audio device is no longer available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            RealtimeError::Unsupported("stream configuration not supported".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend_error(&err.description),
        other => RealtimeError::Unsupported(other.to_string()),
    }
}

fn map_play_error(err: cpal::PlayStreamError) -> RealtimeError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => {
            RealtimeError::DeviceNotFound("audio device is no longer available".to_string())
        }
        cpal::PlayStreamError::BackendSpecific { err } => classify_backend_error(&err.description),
    }
}

// =============================================================================
// Stream Thread
// =============================================================================

/// A thread owning one running `cpal::Stream`.
struct StreamThread {
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn a thread that builds a stream with `build`, starts it and keeps
    /// it alive until [`StreamThread::shutdown`].
    async fn spawn<F>(name: &str, build: F) -> RealtimeResult<Self>
    where
        F: FnOnce() -> RealtimeResult<Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(map_play_error(e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until a stop signal arrives or the sender is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| RealtimeError::Unsupported(format!("Failed to spawn audio thread: {e}")))?;

        let mut thread = Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(thread),
            Ok(Err(e)) => {
                thread.shutdown();
                Err(e)
            }
            Err(_) => {
                thread.shutdown();
                Err(RealtimeError::Unsupported(
                    "audio thread exited before the stream started".to_string(),
                ))
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Capture
// =============================================================================

/// Microphone capture from the host's default input device.
#[derive(Debug, Default, Clone)]
pub struct CpalAudioSource;

struct CpalCaptureStream {
    thread: StreamThread,
}

impl CaptureStream for CpalCaptureStream {
    fn stop(&mut self) {
        self.thread.shutdown();
    }
}

fn forward(
    accumulator: &Arc<Mutex<FrameAccumulator>>,
    data: &[f32],
    rate: u32,
    frames: &FrameSender,
) {
    for samples in accumulator.lock().push(data) {
        // Receiver gone means the session stopped listening
        let _ = frames.send(AudioFrame::new(samples, rate));
    }
}

fn build_input_stream(config: CaptureConfig, frames: FrameSender) -> RealtimeResult<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RealtimeError::DeviceNotFound("no default input device".to_string()))?;
    let input_config = device
        .default_input_config()
        .map_err(map_default_config_error)?;

    let sample_format = input_config.sample_format();
    let stream_config: StreamConfig = input_config.into();
    info!(
        "Capturing from {} ({}Hz, {} channel(s), {:?})",
        device.name().unwrap_or_else(|_| "unknown device".to_string()),
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format
    );
    if config.echo_cancellation || config.noise_suppression || config.auto_gain_control {
        debug!("Capture processing hints are left to the host audio stack");
    }

    let accumulator = Arc::new(Mutex::new(FrameAccumulator::new(
        stream_config.sample_rate.0,
        stream_config.channels,
        &config,
    )));
    let rate = config.sample_rate;
    let err_fn = |err: cpal::StreamError| warn!("Input stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| forward(&accumulator, data, rate, &frames),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let converted: Vec<f32> = data.iter().map(|s| f32::from(*s) / 32768.0).collect();
                forward(&accumulator, &converted, rate, &frames)
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _| {
                let converted: Vec<f32> = data
                    .iter()
                    .map(|s| (f32::from(*s) - 32768.0) / 32768.0)
                    .collect();
                forward(&accumulator, &converted, rate, &frames)
            },
            err_fn,
            None,
        ),
        other => {
            return Err(RealtimeError::Unsupported(format!(
                "input sample format {other:?} is not supported"
            )));
        }
    };
    stream.map_err(map_build_error)
}

#[async_trait]
impl AudioSource for CpalAudioSource {
    async fn open(
        &self,
        config: &CaptureConfig,
        frames: FrameSender,
    ) -> RealtimeResult<Box<dyn CaptureStream>> {
        let config = config.clone();
        let thread =
            StreamThread::spawn("voxy-capture", move || build_input_stream(config, frames)).await?;
        Ok(Box::new(CpalCaptureStream { thread }))
    }
}

// =============================================================================
// Playback
// =============================================================================

struct MixUnit {
    id: PlaybackId,
    samples: Vec<f32>,
    start_frame: u64,
    /// Source samples consumed per output frame
    step: f64,
    position: f64,
}

/// Shared between the engine handle and the output callback.
struct Mixer {
    output_rate: u32,
    frames_played: u64,
    units: Vec<MixUnit>,
    completions: CompletionSender,
}

impl Mixer {
    fn now(&self) -> f64 {
        self.frames_played as f64 / f64::from(self.output_rate)
    }

    /// Render `frames` output frames into `out` (one value per frame).
    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        for unit in &mut self.units {
            for (offset, slot) in out.iter_mut().enumerate() {
                if self.frames_played + offset as u64 < unit.start_frame {
                    continue;
                }
                let index = unit.position as usize;
                if index >= unit.samples.len() {
                    break;
                }
                *slot += unit.samples[index];
                unit.position += unit.step;
            }
        }
        self.frames_played += out.len() as u64;

        let completions = &self.completions;
        self.units.retain(|unit| {
            let done = unit.position as usize >= unit.samples.len();
            if done {
                let _ = completions.send(unit.id);
            }
            !done
        });
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Speaker playback on the host's default output device.
#[derive(Debug, Default, Clone)]
pub struct CpalAudioSink;

struct CpalPlaybackEngine {
    mixer: Arc<Mutex<Mixer>>,
    thread: StreamThread,
}

impl PlaybackEngine for CpalPlaybackEngine {
    fn now(&self) -> f64 {
        self.mixer.lock().now()
    }

    fn play(&mut self, unit: ScheduledUnit) -> RealtimeResult<()> {
        let mut mixer = self.mixer.lock();
        let output_rate = f64::from(mixer.output_rate);
        mixer.units.push(MixUnit {
            id: unit.id,
            start_frame: (unit.start * output_rate).round() as u64,
            step: f64::from(unit.sample_rate) * unit.speed / output_rate,
            samples: unit.samples,
            position: 0.0,
        });
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.mixer.lock().units.retain(|unit| unit.id != id);
    }

    fn close(&mut self) {
        self.mixer.lock().units.clear();
        self.thread.shutdown();
    }
}

fn build_output_stream(mixer: Arc<Mutex<Mixer>>) -> RealtimeResult<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| RealtimeError::DeviceNotFound("no default output device".to_string()))?;
    let output_config = device
        .default_output_config()
        .map_err(map_default_config_error)?;

    let sample_format = output_config.sample_format();
    let stream_config: StreamConfig = output_config.into();
    let channels = usize::from(stream_config.channels);
    mixer.lock().output_rate = stream_config.sample_rate.0.max(1);
    info!(
        "Playing through {} ({}Hz, {} channel(s))",
        device.name().unwrap_or_else(|_| "unknown device".to_string()),
        stream_config.sample_rate.0,
        channels
    );

    let err_fn = |err: cpal::StreamError| warn!("Output stream error: {}", err);
    let mut mono = Vec::new();

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _| {
                mono.resize(data.len() / channels, 0.0);
                mixer.lock().render(&mut mono);
                for (frame, value) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(*value);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _| {
                mono.resize(data.len() / channels, 0.0);
                mixer.lock().render(&mut mono);
                for (frame, value) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(super::codec::encode_sample(*value));
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(RealtimeError::Unsupported(format!(
                "output sample format {other:?} is not supported"
            )));
        }
    };
    stream.map_err(map_build_error)
}

#[async_trait]
impl AudioSink for CpalAudioSink {
    async fn open(
        &self,
        sample_rate: u32,
        completions: CompletionSender,
    ) -> RealtimeResult<Box<dyn PlaybackEngine>> {
        let mixer = Arc::new(Mutex::new(Mixer {
            // Replaced by the device rate before the stream starts
            output_rate: sample_rate.max(1),
            frames_played: 0,
            units: Vec::new(),
            completions,
        }));

        let stream_mixer = mixer.clone();
        let thread =
            StreamThread::spawn("voxy-playback", move || build_output_stream(stream_mixer)).await?;
        Ok(Box::new(CpalPlaybackEngine { mixer, thread }))
    }
}
