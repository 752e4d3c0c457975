//! Error types for the character voice client

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Acknowledgment error: {0}")]
    Ack(#[from] AckError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed wire input. The offending frame is dropped; the connection is unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown engine packet type: {0:?}")]
    UnknownEngineType(char),

    #[error("Unknown packet type: {0:?}")]
    UnknownPacketType(char),

    #[error("Malformed packet header: {0}")]
    MalformedHeader(String),

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Invalid payload for {kind} packet")]
    InvalidPayload { kind: &'static str },

    #[error("Binary frame received with no packet awaiting attachments")]
    UnexpectedBinary,

    #[error("Too many attachments: {count} (max {max})")]
    TooManyAttachments { count: usize, max: usize },

    #[error("Placeholder {num} has no matching attachment")]
    InvalidPlaceholder { num: u64 },
}

/// A packet that is legal on the wire but not in the current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unexpected {packet} packet while {state}")]
    UnexpectedPacket { packet: &'static str, state: String },

    #[error("Server rejected namespace connect: {0}")]
    ConnectRejected(String),

    #[error("Namespace mismatch: expected {expected}, got {actual}")]
    NamespaceMismatch { expected: String, actual: String },
}

/// Socket-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Closed by server")]
    ClosedByServer,

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Handshake timeout")]
    HandshakeTimeout,

    #[error("Gave up after {attempts} reconnection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Engine task has stopped")]
    EngineStopped,
}

/// Outcome of an acknowledgment wait that did not resolve with data
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckError {
    #[error("Acknowledgment timed out")]
    Timeout,

    #[error("Acknowledgment cancelled by disconnect")]
    Cancelled,

    #[error("Outbound packet dropped by backpressure")]
    Dropped,

    #[error("Not connected")]
    NotConnected,
}

/// Audio codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid transport encoding: {0}")]
    InvalidTransport(String),

    #[error("PCM16 buffer has odd length: {0} bytes")]
    OddLength(usize),
}

/// Audio input errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Input unavailable: {0}")]
    Unavailable(String),

    #[error("Voice session is not active")]
    NotActive,

    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
