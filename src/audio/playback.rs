//! Playback assembly
//!
//! Received segments are queued in arrival order and rendered from the
//! queue head into whatever buffer the output device asks to fill. With
//! auto-interrupt enabled, a new stream's start segment discards everything
//! still queued or rendering from the previous stream (barge-in).

use crate::audio::buffer::{AudioSegment, SegmentQueue};
use crate::config::PlaybackConfig;

/// Notifications produced while queueing and rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Queue went from empty to non-empty
    Started,
    /// A stream's end segment has been fully rendered
    Complete,
    /// Prior audio was discarded for a new stream
    Interrupted { discarded_segments: usize },
}

/// The segment currently being rendered
struct Cursor {
    segment: AudioSegment,
    position: usize,
}

impl Cursor {
    fn remaining(&self) -> usize {
        self.segment.samples.len() - self.position
    }
}

pub struct PlaybackAssembler {
    queue: SegmentQueue,
    current: Option<Cursor>,
    auto_interrupt: bool,
    /// Between `Started` and `Complete`
    playing: bool,
    interrupt_count: usize,
    underrun_count: usize,
    /// Underrun already counted for the current gap
    starved: bool,
}

impl PlaybackAssembler {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            queue: SegmentQueue::new(config.queue_capacity.max(1)),
            current: None,
            auto_interrupt: config.auto_interrupt,
            playing: false,
            interrupt_count: 0,
            underrun_count: 0,
            starved: false,
        }
    }

    /// Queue a received segment
    pub fn push(&mut self, segment: AudioSegment) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();

        if segment.is_start() && self.auto_interrupt && self.stream_open() {
            let discarded = self.discard_all();
            tracing::debug!(
                "New stream at sequence {} interrupted playback ({} segments discarded)",
                segment.sequence,
                discarded
            );
            events.push(PlaybackEvent::Interrupted {
                discarded_segments: discarded,
            });
        }

        let sequence = segment.sequence;
        if !self.queue.push(segment) {
            tracing::warn!(
                "Playback queue full ({} segments), dropping segment {}",
                self.queue.capacity(),
                sequence
            );
            return events;
        }

        if !self.playing {
            self.playing = true;
            events.push(PlaybackEvent::Started);
        }
        events
    }

    /// Fill `out` with the next samples, padding with silence on underrun.
    /// Returns the events raised while rendering.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        let mut written = 0;

        while written < out.len() {
            if self.current.as_ref().map_or(true, |c| c.remaining() == 0) {
                if let Some(finished) = self.current.take() {
                    if finished.segment.is_end() && self.queue.is_empty() && self.playing {
                        self.playing = false;
                        events.push(PlaybackEvent::Complete);
                    }
                }
                match self.queue.pop() {
                    Some(segment) => {
                        self.starved = false;
                        self.current = Some(Cursor {
                            segment,
                            position: 0,
                        });
                        continue;
                    }
                    None => break,
                }
            }

            if let Some(cursor) = self.current.as_mut() {
                let n = cursor.remaining().min(out.len() - written);
                let start = cursor.position;
                out[written..written + n].copy_from_slice(&cursor.segment.samples[start..start + n]);
                cursor.position += n;
                written += n;
            }
        }

        // An exhausted end segment completes the stream even if the output
        // buffer was filled exactly
        if let Some(cursor) = &self.current {
            if cursor.remaining() == 0
                && cursor.segment.is_end()
                && self.queue.is_empty()
                && self.playing
            {
                self.current = None;
                self.playing = false;
                events.push(PlaybackEvent::Complete);
            }
        }

        if written < out.len() {
            out[written..].fill(0.0);
            if self.playing && !self.starved {
                self.starved = true;
                self.underrun_count += 1;
                tracing::debug!("Playback underrun: {} samples of silence", out.len() - written);
            }
        }
        events
    }

    /// Discard all queued and in-flight audio (user barge-in)
    pub fn interrupt(&mut self) -> Vec<PlaybackEvent> {
        if !self.stream_open() {
            return Vec::new();
        }
        let discarded = self.discard_all();
        vec![PlaybackEvent::Interrupted {
            discarded_segments: discarded,
        }]
    }

    fn discard_all(&mut self) -> usize {
        let in_flight = usize::from(self.current.take().is_some());
        let discarded = self.queue.clear() + in_flight;
        self.playing = false;
        self.starved = false;
        self.interrupt_count += 1;
        discarded
    }

    /// A stream is open while it is playing, even if starved
    fn stream_open(&self) -> bool {
        self.playing || self.has_audio()
    }

    /// Whether anything is queued or rendering
    pub fn has_audio(&self) -> bool {
        !self.queue.is_empty() || self.current.as_ref().is_some_and(|c| c.remaining() > 0)
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queued_segments(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            queued_segments: self.queue.len(),
            queued_samples: self.queue.queued_samples()
                + self.current.as_ref().map_or(0, Cursor::remaining),
            overflow_count: self.queue.overflow_count(),
            underrun_count: self.underrun_count,
            interrupt_count: self.interrupt_count,
        }
    }
}

/// Playback statistics
#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub queued_segments: usize,
    pub queued_samples: usize,
    pub overflow_count: usize,
    pub underrun_count: usize,
    pub interrupt_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::ChunkMarker;

    fn assembler(auto_interrupt: bool) -> PlaybackAssembler {
        PlaybackAssembler::new(&PlaybackConfig {
            auto_interrupt,
            queue_capacity: 8,
        })
    }

    fn seg(sequence: u32, value: f32, len: usize, marker: ChunkMarker) -> AudioSegment {
        AudioSegment::new(sequence, vec![value; len], marker)
    }

    fn count(events: &[PlaybackEvent], wanted: &PlaybackEvent) -> usize {
        events.iter().filter(|e| *e == wanted).count()
    }

    #[test]
    fn test_renders_in_receipt_order() {
        let mut playback = assembler(true);
        assert_eq!(
            playback.push(seg(0, 0.1, 2, ChunkMarker::Start)),
            vec![PlaybackEvent::Started]
        );
        assert!(playback.push(seg(1, 0.2, 2, ChunkMarker::Continuation)).is_empty());

        let mut out = [0.0; 3];
        playback.render(&mut out);
        assert_eq!(out, [0.1, 0.1, 0.2]);
    }

    #[test]
    fn test_complete_after_end_segment_rendered() {
        let mut playback = assembler(true);
        playback.push(seg(0, 0.1, 4, ChunkMarker::Start));
        playback.push(seg(1, 0.2, 4, ChunkMarker::End));

        let mut out = [0.0; 4];
        assert!(playback.render(&mut out).is_empty());

        let events = playback.render(&mut out);
        assert_eq!(events, vec![PlaybackEvent::Complete]);
        assert!(!playback.is_playing());
        assert!(!playback.has_audio());
    }

    #[test]
    fn test_underrun_defers_complete() {
        let mut playback = assembler(true);
        playback.push(seg(0, 0.1, 2, ChunkMarker::Start));

        let mut out = [1.0; 4];
        let events = playback.render(&mut out);
        assert!(events.is_empty());
        assert_eq!(out, [0.1, 0.1, 0.0, 0.0]);
        assert!(playback.is_playing());
        assert_eq!(playback.stats().underrun_count, 1);

        // Continued starvation is the same underrun
        playback.render(&mut out);
        assert_eq!(playback.stats().underrun_count, 1);

        playback.push(seg(1, 0.3, 2, ChunkMarker::End));
        let events = playback.render(&mut out);
        assert_eq!(events, vec![PlaybackEvent::Complete]);
        assert_eq!(out, [0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn test_auto_interrupt_discards_prior_stream() {
        let mut playback = assembler(true);
        let mut events = playback.push(seg(0, 0.1, 4, ChunkMarker::Start));
        events.extend(playback.push(seg(1, 0.1, 4, ChunkMarker::Continuation)));
        let mut out = [0.0; 2];
        playback.render(&mut out);

        let new_events = playback.push(seg(0, 0.9, 4, ChunkMarker::Start));
        assert_eq!(count(&new_events, &PlaybackEvent::Started), 1);
        assert_eq!(
            new_events[0],
            PlaybackEvent::Interrupted {
                discarded_segments: 2
            }
        );
        assert_eq!(playback.queued_segments(), 1);

        let mut out = [0.0; 4];
        assert!(playback.render(&mut out).is_empty());
        assert_eq!(out, [0.9; 4]);
        assert_eq!(playback.stats().interrupt_count, 1);
    }

    #[test]
    fn test_started_fires_once_for_new_stream() {
        let mut playback = assembler(true);
        playback.push(seg(0, 0.1, 4, ChunkMarker::Start));
        playback.push(seg(1, 0.1, 4, ChunkMarker::Continuation));

        let mut events = playback.push(seg(0, 0.5, 4, ChunkMarker::Start));
        events.extend(playback.push(seg(1, 0.5, 4, ChunkMarker::End)));
        let mut out = [0.0; 8];
        events.extend(playback.render(&mut out));

        assert_eq!(count(&events, &PlaybackEvent::Started), 1);
        assert_eq!(count(&events, &PlaybackEvent::Complete), 1);
    }

    #[test]
    fn test_new_stream_after_underrun_restarts_playback() {
        let mut playback = assembler(true);
        playback.push(seg(0, 0.1, 2, ChunkMarker::Start));
        let mut out = [0.0; 4];
        playback.render(&mut out);
        assert!(playback.is_playing());
        assert!(!playback.has_audio());

        let events = playback.push(seg(0, 0.7, 2, ChunkMarker::Start));
        assert_eq!(
            events,
            vec![
                PlaybackEvent::Interrupted {
                    discarded_segments: 0
                },
                PlaybackEvent::Started,
            ]
        );

        let mut out = [0.0; 2];
        playback.render(&mut out);
        assert_eq!(out, [0.7, 0.7]);
    }

    #[test]
    fn test_explicit_interrupt_while_starved() {
        let mut playback = assembler(true);
        playback.push(seg(0, 0.1, 2, ChunkMarker::Start));
        let mut out = [0.0; 4];
        playback.render(&mut out);

        assert_eq!(playback.interrupt().len(), 1);
        assert!(!playback.is_playing());
        assert!(playback.interrupt().is_empty());
    }

    #[test]
    fn test_without_auto_interrupt_streams_queue() {
        let mut playback = assembler(false);
        playback.push(seg(0, 0.1, 2, ChunkMarker::Start));
        let events = playback.push(seg(0, 0.2, 2, ChunkMarker::Start));
        assert!(events.is_empty());
        assert_eq!(playback.queued_segments(), 2);
    }

    #[test]
    fn test_explicit_interrupt() {
        let mut playback = assembler(true);
        assert!(playback.interrupt().is_empty());
        playback.push(seg(0, 0.1, 2, ChunkMarker::Start));
        assert_eq!(
            playback.interrupt(),
            vec![PlaybackEvent::Interrupted {
                discarded_segments: 1
            }]
        );
        assert!(!playback.is_playing());
    }

    #[test]
    fn test_overflow_drops_segment() {
        let mut playback = PlaybackAssembler::new(&PlaybackConfig {
            auto_interrupt: true,
            queue_capacity: 1,
        });
        playback.push(seg(0, 0.1, 2, ChunkMarker::Start));
        playback.push(seg(1, 0.1, 2, ChunkMarker::Continuation));
        assert_eq!(playback.stats().overflow_count, 1);
    }
}
