//! Audio chunk types and the bounded segment queue used for playback

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Position of a chunk within its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMarker {
    Start,
    Continuation,
    End,
}

/// Captured audio ready for transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Stream-relative sequence number, 0 for the first chunk
    pub sequence: u32,
    /// Mono PCM16 samples
    pub samples: Vec<i16>,
    pub marker: ChunkMarker,
}

impl AudioChunk {
    pub fn new(sequence: u32, samples: Vec<i16>, marker: ChunkMarker) -> Self {
        Self {
            sequence,
            samples,
            marker,
        }
    }

    /// Chunk duration in milliseconds
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1000) / sample_rate as u64
    }
}

/// Decoded audio received for playback
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Sequence number assigned by the sending stream
    pub sequence: u32,
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    pub marker: ChunkMarker,
}

impl AudioSegment {
    pub fn new(sequence: u32, samples: Vec<f32>, marker: ChunkMarker) -> Self {
        Self {
            sequence,
            samples,
            marker,
        }
    }

    pub fn is_start(&self) -> bool {
        self.marker == ChunkMarker::Start
    }

    pub fn is_end(&self) -> bool {
        self.marker == ChunkMarker::End
    }
}

/// Bounded FIFO of segments awaiting render
pub struct SegmentQueue {
    queue: VecDeque<AudioSegment>,
    capacity: usize,
    overflow_count: usize,
}

impl SegmentQueue {
    /// Create a new queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            overflow_count: 0,
        }
    }

    /// Push a segment
    /// Returns false if the queue is full (overflow)
    pub fn push(&mut self, segment: AudioSegment) -> bool {
        if self.queue.len() >= self.capacity {
            self.overflow_count += 1;
            return false;
        }
        self.queue.push_back(segment);
        true
    }

    pub fn pop(&mut self) -> Option<AudioSegment> {
        self.queue.pop_front()
    }

    /// Remove all segments, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples across all queued segments
    pub fn queued_samples(&self) -> usize {
        self.queue.iter().map(|s| s.samples.len()).sum()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    /// Get fill level as percentage
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_queue_fifo() {
        let mut queue = SegmentQueue::new(4);

        assert!(queue.push(AudioSegment::new(0, vec![0.0; 240], ChunkMarker::Start)));
        assert!(queue.push(AudioSegment::new(1, vec![0.5; 240], ChunkMarker::End)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.queued_samples(), 480);

        assert_eq!(queue.pop().unwrap().sequence, 0);
        assert_eq!(queue.pop().unwrap().sequence, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_segment_queue_overflow() {
        let mut queue = SegmentQueue::new(2);
        for seq in 0..3 {
            queue.push(AudioSegment::new(seq, vec![], ChunkMarker::Continuation));
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.overflow_count(), 1);
        assert_eq!(queue.fill_level(), 1.0);
        assert_eq!(queue.clear(), 2);
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk::new(0, vec![0; 1600], ChunkMarker::Start);
        assert_eq!(chunk.duration_ms(16000), 100);
    }
}
