//! Application events exchanged with the character service
//!
//! Every event travels as a named event packet whose single argument is one
//! of the JSON objects below.

use serde::{Deserialize, Serialize};

use crate::audio::buffer::ChunkMarker;

pub const USER_TEXT: &str = "user_text";
pub const AUDIO_CHUNK: &str = "audio_chunk";
pub const VOICE_START: &str = "voice_start";
pub const VOICE_END: &str = "voice_end";

pub const BOT_RESPONSE: &str = "bot_response";
pub const TRANSCRIPT: &str = "transcript";
pub const AUDIO_RESPONSE: &str = "audio_response";
pub const SERVER_ERROR: &str = "error";

/// Typed text input from the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserText {
    pub text: String,
}

/// One captured chunk, PCM16 encoded for transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkMessage {
    pub audio: String,
    pub sequence: u32,
    pub marker: ChunkMarker,
    pub sample_rate: u32,
}

/// Start of a voice session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStart {
    pub sample_rate: u32,
}

/// A streamed text delta; used for both bot responses and transcripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDelta {
    pub utterance_id: String,
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

/// Synthesized audio for the character's reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioResponse {
    pub audio: String,
    pub sequence: u32,
    pub marker: ChunkMarker,
    #[serde(default = "default_playback_rate")]
    pub sample_rate: u32,
}

fn default_playback_rate() -> u32 {
    crate::constants::PLAYBACK_SAMPLE_RATE
}

/// Error reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}
