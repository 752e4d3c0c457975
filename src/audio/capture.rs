//! Capture chunking
//!
//! Audio arrives through [`FrameSink::supply`], whether it is pushed by a
//! device callback or pulled by a polling loop. The chunker groups it into
//! transport-ready [`AudioChunk`]s according to the configured mode and
//! voice gate, and sends them down a channel in sequence order.

use crossbeam_channel::Sender;

use crate::audio::buffer::{AudioChunk, ChunkMarker};
use crate::audio::vad::{GateDecision, VoiceGate};
use crate::codec::pcm::float_to_pcm16;
use crate::config::{CaptureConfig, ChunkMode};
use crate::constants::CAPTURE_SAMPLE_RATE;

/// Anything that accepts captured mono frames at the capture sample rate
pub trait FrameSink {
    fn supply(&mut self, frame: &[f32]);
}

/// Groups captured frames into sequenced chunks
pub struct CaptureChunker {
    mode: ChunkMode,
    chunk_samples: usize,
    gate: Option<VoiceGate>,
    pending: Vec<f32>,
    sequence: u32,
    active: bool,
    output: Sender<AudioChunk>,
    chunks_emitted: u64,
    samples_suppressed: u64,
}

impl CaptureChunker {
    pub fn new(config: &CaptureConfig, output: Sender<AudioChunk>) -> Self {
        let chunk_samples = config.chunk_samples().max(1);
        Self {
            mode: config.mode,
            chunk_samples,
            gate: config
                .vad
                .clone()
                .map(|vad| VoiceGate::new(vad, CAPTURE_SAMPLE_RATE)),
            pending: Vec::with_capacity(chunk_samples * 2),
            sequence: 0,
            active: false,
            output,
            chunks_emitted: 0,
            samples_suppressed: 0,
        }
    }

    /// Begin a new capture stream; sequence numbers restart at 0
    pub fn start(&mut self) {
        self.pending.clear();
        self.sequence = 0;
        self.active = true;
        if let Some(gate) = self.gate.as_mut() {
            gate.reset();
        }
        tracing::debug!("Capture stream started ({:?} mode)", self.mode);
    }

    /// Stop the stream, cancelling any buffered audio not yet emitted.
    /// Returns the number of samples discarded.
    pub fn stop(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        self.active = false;
        if let Some(gate) = self.gate.as_mut() {
            gate.reset();
        }
        if discarded > 0 {
            tracing::debug!("Capture stopped, discarded {} buffered samples", discarded);
        }
        discarded
    }

    /// End the stream, emitting any buffered audio as a final `End` chunk
    pub fn flush(&mut self) {
        if !self.active {
            return;
        }
        let remainder = std::mem::take(&mut self.pending);
        self.emit(&remainder, ChunkMarker::End);
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Next sequence number to be emitted
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Samples buffered but not yet emitted
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }

    pub fn samples_suppressed(&self) -> u64 {
        self.samples_suppressed
    }

    fn emit(&mut self, samples: &[f32], marker: ChunkMarker) {
        let marker = match marker {
            ChunkMarker::End => ChunkMarker::End,
            _ if self.sequence == 0 => ChunkMarker::Start,
            _ => ChunkMarker::Continuation,
        };
        let chunk = AudioChunk::new(self.sequence, float_to_pcm16(samples), marker);
        self.sequence += 1;
        self.chunks_emitted += 1;
        if self.output.send(chunk).is_err() {
            tracing::warn!("Capture chunk dropped: receiver is gone");
        }
    }
}

impl FrameSink for CaptureChunker {
    fn supply(&mut self, frame: &[f32]) {
        if !self.active || frame.is_empty() {
            return;
        }

        if let Some(gate) = self.gate.as_mut() {
            let was_open = gate.is_open();
            if gate.process(frame) == GateDecision::Suppress {
                self.samples_suppressed += frame.len() as u64;
                // The speech burst ended; its buffered tail goes out now
                if was_open && !self.pending.is_empty() {
                    let tail = std::mem::take(&mut self.pending);
                    self.emit(&tail, ChunkMarker::Continuation);
                }
                return;
            }
        }

        match self.mode {
            ChunkMode::Immediate => self.emit(frame, ChunkMarker::Continuation),
            ChunkMode::Buffered => {
                self.pending.extend_from_slice(frame);
                while self.pending.len() >= self.chunk_samples {
                    let chunk: Vec<f32> = self.pending.drain(..self.chunk_samples).collect();
                    self.emit(&chunk, ChunkMarker::Continuation);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VadConfig;
    use crossbeam_channel::{unbounded, Receiver};

    fn chunker(config: CaptureConfig) -> (CaptureChunker, Receiver<AudioChunk>) {
        let (tx, rx) = unbounded();
        let mut chunker = CaptureChunker::new(&config, tx);
        chunker.start();
        (chunker, rx)
    }

    #[test]
    fn test_buffered_emits_at_threshold() {
        let (mut chunker, rx) = chunker(CaptureConfig::buffered(100));

        // 150ms at 16kHz
        chunker.supply(&vec![0.1; 2400]);

        let chunks: Vec<_> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 1600);
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunks[0].marker, ChunkMarker::Start);
        assert_eq!(chunker.pending_samples(), 800);

        chunker.supply(&vec![0.1; 800]);
        let chunks: Vec<_> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 1);
        assert_eq!(chunks[0].marker, ChunkMarker::Continuation);
        assert_eq!(chunker.pending_samples(), 0);
    }

    #[test]
    fn test_immediate_emits_every_frame() {
        let (mut chunker, rx) = chunker(CaptureConfig::immediate());
        chunker.supply(&[0.1; 160]);
        chunker.supply(&[0.1; 320]);

        let chunks: Vec<_> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].samples.len(), 160);
        assert_eq!(chunks[1].samples.len(), 320);
        assert_eq!(
            chunks.iter().map(|c| c.sequence).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_restart_resets_sequence() {
        let (mut chunker, rx) = chunker(CaptureConfig::immediate());
        chunker.supply(&[0.1; 10]);
        chunker.supply(&[0.1; 10]);
        chunker.stop();
        chunker.start();
        chunker.supply(&[0.1; 10]);

        let sequences: Vec<_> = rx.try_iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 0]);
    }

    #[test]
    fn test_stop_cancels_pending() {
        let (mut chunker, rx) = chunker(CaptureConfig::buffered(100));
        chunker.supply(&vec![0.1; 1000]);
        assert_eq!(chunker.stop(), 1000);
        assert!(rx.try_recv().is_err());

        // Input after stop is ignored
        chunker.supply(&vec![0.1; 2000]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flush_emits_end_chunk() {
        let (mut chunker, rx) = chunker(CaptureConfig::buffered(100));
        chunker.supply(&vec![0.1; 2000]);
        chunker.flush();

        let chunks: Vec<_> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].samples.len(), 400);
        assert_eq!(chunks[1].marker, ChunkMarker::End);
        assert!(!chunker.is_active());
    }

    #[test]
    fn test_vad_suppresses_silence() {
        let mut config = CaptureConfig::immediate();
        config.vad = Some(VadConfig {
            start_threshold: 0.2,
            end_threshold: 0.1,
            hangover_ms: 0,
        });
        let (mut chunker, rx) = chunker(config);

        chunker.supply(&[0.0; 160]);
        chunker.supply(&[0.5; 160]);
        chunker.supply(&[0.0; 160]);

        let chunks: Vec<_> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunker.samples_suppressed(), 320);
    }

    #[test]
    fn test_gate_close_sends_buffered_tail() {
        let mut config = CaptureConfig::buffered(100);
        config.vad = Some(VadConfig {
            start_threshold: 0.2,
            end_threshold: 0.1,
            hangover_ms: 0,
        });
        let (mut chunker, rx) = chunker(config);

        chunker.supply(&vec![0.5; 1000]);
        assert!(rx.try_recv().is_err());

        chunker.supply(&[0.0; 160]);
        let tail: Vec<_> = rx.try_iter().collect();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].samples.len(), 1000);
        assert_eq!(chunker.pending_samples(), 0);

        // The next burst starts from an empty buffer
        chunker.supply(&vec![0.5; 1600]);
        let next: Vec<_> = rx.try_iter().collect();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].sequence, 1);
        assert!(next[0].samples.iter().all(|&s| s == float_to_pcm16(&[0.5])[0]));
    }
}
