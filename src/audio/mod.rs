//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod playback;
pub mod tone;
pub mod vad;

pub use buffer::{AudioChunk, AudioSegment, ChunkMarker, SegmentQueue};
pub use capture::{CaptureChunker, FrameSink};
pub use playback::{PlaybackAssembler, PlaybackEvent, PlaybackStats};
pub use tone::{ToneHandle, ToneSource};
pub use vad::VoiceGate;
