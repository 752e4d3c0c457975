//! Capture-side transport encoder
//!
//! Turns captured chunks into `audio_chunk` event payloads.

use crate::audio::buffer::AudioChunk;
use crate::codec::pcm::{encode_transport, pcm16_to_bytes};
use crate::constants::CAPTURE_SAMPLE_RATE;
use crate::protocol::messages::AudioChunkMessage;

/// Encoder for outbound audio
pub struct TransportEncoder {
    sample_rate: u32,
    /// Chunk counter for statistics
    frames_encoded: u64,
    /// Total transport bytes produced
    bytes_produced: u64,
}

impl Default for TransportEncoder {
    fn default() -> Self {
        Self::new(CAPTURE_SAMPLE_RATE)
    }
}

impl TransportEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode a chunk as PCM16 LE, then as transport text
    pub fn encode(&mut self, chunk: &AudioChunk) -> AudioChunkMessage {
        let audio = encode_transport(&pcm16_to_bytes(&chunk.samples));

        self.frames_encoded += 1;
        self.bytes_produced += audio.len() as u64;

        AudioChunkMessage {
            audio,
            sequence: chunk.sequence,
            marker: chunk.marker,
            sample_rate: self.sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_encoded = 0;
        self.bytes_produced = 0;
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
