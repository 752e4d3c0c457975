//! Audio codec
//!
//! PCM16 sample conversion plus the text-safe transport encoding used to
//! carry audio inside event payloads.

pub mod decoder;
pub mod encoder;
pub mod pcm;

pub use decoder::TransportDecoder;
pub use encoder::TransportEncoder;
pub use pcm::{decode_transport, encode_transport, float_to_pcm16, pcm16_to_float};
