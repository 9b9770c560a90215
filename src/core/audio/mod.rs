//! Audio in and out of the session.
//!
//! - [`capture`]: microphone frames ([`AudioSource`], [`CaptureStream`])
//! - [`codec`]: float ↔ PCM16 ↔ base64
//! - [`playback`]: gapless scheduling and barge-in ([`Player`], [`AudioSink`])
//! - `device` (feature `device-audio`): `cpal` implementations of both ends

pub mod capture;
pub mod codec;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod playback;

pub use capture::{
    AudioFrame, AudioSource, CaptureConfig, CaptureProfile, CaptureStream, FrameAccumulator,
    FrameSender, SilentAudioSource,
};
pub use codec::{
    decode_base64_pcm16, decode_pcm16, decode_sample, encode_frame, encode_frame_base64,
    encode_sample,
};
#[cfg(feature = "device-audio")]
pub use device::{CpalAudioSink, CpalAudioSource};
pub use playback::{
    AudioSink, CompletionSender, DEFAULT_PLAYBACK_SPEED, HeadlessAudioSink, PlaybackEngine,
    PlaybackId, PlaybackSchedule, Player, ScheduledUnit, Slot,
};
