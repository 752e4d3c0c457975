//! Playback-side transport decoder
//!
//! Turns `audio_response` payloads into segments for the playback assembler.

use crate::audio::buffer::AudioSegment;
use crate::codec::pcm::{bytes_to_pcm16, decode_transport, pcm16_to_float};
use crate::constants::PLAYBACK_SAMPLE_RATE;
use crate::error::CodecError;
use crate::protocol::messages::AudioResponse;

/// Decoder for inbound audio
pub struct TransportDecoder {
    sample_rate: u32,
    /// Segments decoded
    frames_decoded: u64,
    /// Payloads rejected as malformed
    frames_rejected: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl Default for TransportDecoder {
    fn default() -> Self {
        Self::new(PLAYBACK_SAMPLE_RATE)
    }
}

impl TransportDecoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_decoded: 0,
            frames_rejected: 0,
            samples_produced: 0,
        }
    }

    /// Decode transport text into normalized samples
    pub fn decode(&mut self, response: &AudioResponse) -> Result<AudioSegment, CodecError> {
        if response.sample_rate != self.sample_rate {
            tracing::debug!(
                "Audio response at {}Hz, playback expects {}Hz",
                response.sample_rate,
                self.sample_rate
            );
        }

        let pcm = decode_transport(&response.audio)
            .and_then(|bytes| bytes_to_pcm16(&bytes))
            .inspect_err(|_| self.frames_rejected += 1)?;
        let samples = pcm16_to_float(&pcm);

        self.frames_decoded += 1;
        self.samples_produced += samples.len() as u64;

        Ok(AudioSegment::new(response.sequence, samples, response.marker))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
            samples_produced: self.samples_produced,
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.frames_rejected = 0;
        self.samples_produced = 0;
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub samples_produced: u64,
}
