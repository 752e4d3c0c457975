//! Sample-format conversion and text-safe transport encoding
//!
//! Audio travels as little-endian PCM16, base64-encoded so it can ride
//! inside JSON event payloads.

use base64::prelude::*;
use bytes::Bytes;

use crate::error::CodecError;

/// Scale between normalized floats and PCM16.
pub const PCM16_SCALE: f32 = 32767.0;

/// Convert normalized samples to PCM16 (clamped to [-1, 1], scaled, rounded).
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            // NaN clamps to NaN; treat it as silence
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            (s * PCM16_SCALE).round() as i16
        })
        .collect()
}

/// Convert PCM16 samples back to normalized floats.
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| (s as f32 / PCM16_SCALE).max(-1.0))
        .collect()
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(out)
}

/// Parse little-endian PCM16 bytes.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode raw bytes as transport text.
pub fn encode_transport(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode transport text back into raw bytes.
pub fn decode_transport(text: &str) -> Result<Bytes, CodecError> {
    BASE64_STANDARD
        .decode(text)
        .map(Bytes::from)
        .map_err(|e| CodecError::InvalidTransport(e.to_string()))
}
