//! # Character Voice Client
//!
//! Real-time conversational client for a remote character service: text and
//! voice out, streamed text and synthesized speech back, over one persistent
//! multiplexed socket.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                           CharacterClient                              │
//! │                                                                        │
//! │  Microphone / ToneSource                            Speaker (render)   │
//! │         │                                                  ▲           │
//! │         ▼ FrameSink::supply                                │           │
//! │  ┌──────────────┐   ┌──────────────┐            ┌──────────────────┐   │
//! │  │CaptureChunker│──▶│TransportEnc. │            │PlaybackAssembler │   │
//! │  │ (VAD, 16kHz) │   │ PCM16+base64 │            │ (auto-interrupt) │   │
//! │  └──────────────┘   └──────┬───────┘            └────────▲─────────┘   │
//! │                            │ audio_chunk                 │             │
//! │                            │ user_text    ┌──────────────┴─────┐       │
//! │                            │              │  TransportDecoder  │       │
//! │                            │              │   24kHz segments   │       │
//! │                            │              └──────────▲─────────┘       │
//! │                            │   bot_response          │ audio_response  │
//! │                            │   transcript ──▶ ResponseAssembler        │
//! │                            ▼                         │                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            ProtocolEngine (network::engine, one task)           │   │
//! │  │  handshake · heartbeat · reconnect · acks · outbound queue      │   │
//! │  │                 EventRegistry (events)                          │   │
//! │  └───────────────────────────────┬─────────────────────────────────┘   │
//! │                                  │ protocol::codec (encode / Decoder)  │
//! └──────────────────────────────────┼─────────────────────────────────────┘
//!                                    │ WebSocket (text frames + binary attachments)
//!                                    ▼
//!                          Character service
//! ```

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod protocol;
pub mod response;

pub use client::{CharacterClient, ClientEvent};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use network::{ConnectionState, ProtocolEngine, WebSocketConnector};

/// Application-wide constants
pub mod constants {
    /// Capture sample rate (mono PCM16 on the wire)
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Playback sample rate of synthesized speech
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Default buffered-mode chunk length in milliseconds
    pub const DEFAULT_CHUNK_MS: u32 = 100;

    /// Default acknowledgment deadline
    pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

    /// Default deadline for socket open plus handshake
    pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 20_000;

    /// Sends held while not connected
    pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 256;

    /// Attachments one inbound packet may declare
    pub const DEFAULT_MAX_ATTACHMENTS: usize = 16;

    /// Playback queue capacity (in segments)
    pub const DEFAULT_PLAYBACK_QUEUE_CAPACITY: usize = 512;

    /// Test tone frequency
    pub const DEFAULT_TONE_HZ: f32 = 440.0;
}
