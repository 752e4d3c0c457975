//! Synthetic test-tone input
//!
//! Stands in for a microphone where none is available. Frames go through
//! the same [`FrameSink`] path as real capture.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::audio::capture::FrameSink;
use crate::constants::{CAPTURE_SAMPLE_RATE, DEFAULT_TONE_HZ};
use crate::error::CaptureError;

/// Fixed-frequency sine generator
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    frame_samples: usize,
    phase: f32,
}

impl Default for ToneSource {
    fn default() -> Self {
        // 20ms frames
        Self::new(DEFAULT_TONE_HZ, 0.5, CAPTURE_SAMPLE_RATE, CAPTURE_SAMPLE_RATE as usize / 50)
    }
}

impl ToneSource {
    pub fn new(frequency: f32, amplitude: f32, sample_rate: u32, frame_samples: usize) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate,
            frame_samples,
            phase: 0.0,
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Wall-clock duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate as u64)
    }

    /// Generate the next frame, continuing the phase of the previous one
    pub fn next_frame(&mut self) -> Vec<f32> {
        let step = TAU * self.frequency / self.sample_rate as f32;
        (0..self.frame_samples)
            .map(|_| {
                let sample = self.phase.sin() * self.amplitude;
                self.phase = (self.phase + step) % TAU;
                sample
            })
            .collect()
    }

    /// Supply `frames` frames to a sink back to back
    pub fn pump(&mut self, sink: &mut dyn FrameSink, frames: usize) {
        for _ in 0..frames {
            let frame = self.next_frame();
            sink.supply(&frame);
        }
    }

    /// Generate frames in real time on a background thread until stopped
    pub fn spawn(self, output: Sender<Vec<f32>>) -> Result<ToneHandle, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let mut source = self;

        let handle = thread::Builder::new()
            .name("capture-tone".to_string())
            .spawn(move || {
                let period = source.frame_duration();
                while running_for_loop.load(Ordering::Relaxed) {
                    if output.send(source.next_frame()).is_err() {
                        break;
                    }
                    thread::sleep(period);
                }
            })
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;

        Ok(ToneHandle {
            running,
            thread_handle: Some(handle),
        })
    }
}

/// Stops the tone thread when dropped
pub struct ToneHandle {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ToneHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ToneHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::ChunkMarker;
    use crate::audio::capture::CaptureChunker;
    use crate::config::CaptureConfig;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_tone_shape() {
        let mut tone = ToneSource::new(1000.0, 0.5, 16000, 16);
        let frame = tone.next_frame();
        assert_eq!(frame.len(), 16);
        assert_eq!(frame[0], 0.0);
        // Quarter period of 1kHz at 16kHz is 4 samples
        assert!((frame[4] - 0.5).abs() < 1e-4);
        assert!(frame.iter().all(|s| s.abs() <= 0.5 + 1e-6));
    }

    #[test]
    fn test_tone_drives_chunker() {
        let (tx, rx) = unbounded();
        let mut chunker = CaptureChunker::new(&CaptureConfig::buffered(100), tx);
        chunker.start();

        // 10 frames of 20ms = 200ms = two 100ms chunks
        let mut tone = ToneSource::default();
        tone.pump(&mut chunker, 10);

        let chunks: Vec<_> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].marker, ChunkMarker::Start);
        assert_eq!(chunks[1].sequence, 1);
        assert!(chunks[0].samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_spawned_tone_stops() {
        let (tx, rx) = unbounded();
        let mut handle = ToneSource::default().spawn(tx).unwrap();
        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.len(), 320);
        handle.stop();
        assert!(!handle.is_running());
    }
}
