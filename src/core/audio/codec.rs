//! PCM16 wire codec.
//!
//! Microphone frames are float samples in `[-1.0, 1.0]`; the wire carries
//! signed 16-bit little-endian integers, base64 encoded. Scaling is
//! asymmetric: negative samples map onto `[-32768, 0)` and non-negative ones
//! onto `[0, 32767]`, so both ends of the range are reachable.

use base64::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};

use crate::core::realtime::{RealtimeError, RealtimeResult};

const NEGATIVE_SCALE: f64 = 32768.0;
const POSITIVE_SCALE: f64 = 32767.0;

/// Convert one float sample to PCM16.
///
/// Clamps to `[-1, 1]` and truncates toward zero. `NaN` encodes as silence.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = f64::from(sample).clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * NEGATIVE_SCALE) as i16
    } else {
        (s * POSITIVE_SCALE) as i16
    }
}

/// Convert one PCM16 sample back to float.
#[inline]
pub fn decode_sample(sample: i16) -> f32 {
    if sample < 0 {
        (f64::from(sample) / NEGATIVE_SCALE) as f32
    } else {
        (f64::from(sample) / POSITIVE_SCALE) as f32
    }
}

/// Encode a frame of float samples as PCM16 little-endian bytes.
pub fn encode_frame(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        buf.put_i16_le(encode_sample(sample));
    }
    buf.freeze()
}

/// Encode a frame of float samples as base64 PCM16, ready for
/// `input_audio_buffer.append`.
pub fn encode_frame_base64(samples: &[f32]) -> String {
    BASE64_STANDARD.encode(encode_frame(samples))
}

/// Decode PCM16 little-endian bytes into float samples.
///
/// A trailing half sample is a protocol violation.
pub fn decode_pcm16(bytes: &[u8]) -> RealtimeResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(RealtimeError::ProtocolError(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Decode a base64 PCM16 payload from `response.audio.delta`.
pub fn decode_base64_pcm16(payload: &str) -> RealtimeResult<Vec<f32>> {
    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| RealtimeError::ProtocolError(format!("Invalid base64 audio: {e}")))?;
    decode_pcm16(&bytes)
}
