//! Wire packet types
//!
//! Two framings are layered on the socket:
//!
//! ```text
//! outer: ┌──────────────┬──────────────────────────────────────────────┐
//!        │ Engine type  │ Body                                          │
//!        │ (1 digit)    │ open: JSON handshake, message: inner packet   │
//!        └──────────────┴──────────────────────────────────────────────┘
//! inner: ┌────────┬────────────────┬─────────────┬────────┬───────────┐
//!        │ Type   │ Attachments "-"│ Namespace ","│ Ack id │ JSON data │
//!        │(1 digit)│ (binary only) │ (if not "/") │ (opt.) │ (opt.)    │
//!        └────────┴────────────────┴─────────────┴────────┴───────────┘
//! ```
//!
//! Binary attachments follow a binary packet as separate binary socket
//! frames, in the order of the placeholders in the JSON data.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The default namespace.
pub const ROOT_NAMESPACE: &str = "/";

/// JSON key marking a binary placeholder.
pub const PLACEHOLDER_KEY: &str = "_placeholder";

/// A single socket message, text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

/// Outer transport-heartbeat packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineKind {
    Open = 0,
    Close = 1,
    Ping = 2,
    Pong = 3,
    Message = 4,
    Upgrade = 5,
    Noop = 6,
}

impl EngineKind {
    pub fn from_digit(c: char) -> Option<Self> {
        Some(match c {
            '0' => Self::Open,
            '1' => Self::Close,
            '2' => Self::Ping,
            '3' => Self::Pong,
            '4' => Self::Message,
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            _ => return None,
        })
    }

    pub fn digit(self) -> char {
        (b'0' + self as u8) as char
    }
}

/// Inner multiplexing packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketKind {
    pub fn from_digit(c: char) -> Option<Self> {
        Some(match c {
            '0' => Self::Connect,
            '1' => Self::Disconnect,
            '2' => Self::Event,
            '3' => Self::Ack,
            '4' => Self::ConnectError,
            '5' => Self::BinaryEvent,
            '6' => Self::BinaryAck,
            _ => return None,
        })
    }

    pub fn digit(self) -> char {
        (b'0' + self as u8) as char
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Event => "event",
            Self::Ack => "ack",
            Self::ConnectError => "connect_error",
            Self::BinaryEvent => "binary_event",
            Self::BinaryAck => "binary_ack",
        }
    }
}

/// Structured packet data with binary leaves resolved in place.
///
/// `Array` and `Object` nodes are only used for subtrees that contain
/// binary; binary-free subtrees stay a single `Json` value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
}

impl Payload {
    pub fn has_binary(&self) -> bool {
        match self {
            Payload::Json(_) => false,
            Payload::Binary(_) => true,
            Payload::Array(items) => items.iter().any(Payload::has_binary),
            Payload::Object(map) => map.values().any(Payload::has_binary),
        }
    }

    /// The JSON value, if this node carries no binary
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Replace binary leaves with placeholders, appending the binaries
    /// to `attachments` in placeholder order.
    pub fn deconstruct(&self, attachments: &mut Vec<Bytes>) -> Value {
        match self {
            Payload::Json(v) => v.clone(),
            Payload::Binary(b) => {
                let num = attachments.len();
                attachments.push(b.clone());
                serde_json::json!({ "_placeholder": true, "num": num })
            }
            Payload::Array(items) => {
                Value::Array(items.iter().map(|p| p.deconstruct(attachments)).collect())
            }
            Payload::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, p)| (k.clone(), p.deconstruct(attachments)))
                    .collect(),
            ),
        }
    }

    /// Rebuild a payload from JSON containing placeholders.
    ///
    /// Returns the index of the first placeholder with no matching
    /// attachment on failure.
    pub fn reconstruct(value: Value, attachments: &[Bytes]) -> Result<Payload, u64> {
        if !contains_placeholder(&value) {
            return Ok(Payload::Json(value));
        }
        match value {
            Value::Object(map) if is_placeholder(&map) => {
                let num = map.get("num").and_then(Value::as_u64).unwrap_or(u64::MAX);
                attachments
                    .get(num as usize)
                    .cloned()
                    .map(Payload::Binary)
                    .ok_or(num)
            }
            Value::Array(items) => items
                .into_iter()
                .map(|v| Payload::reconstruct(v, attachments))
                .collect::<Result<Vec<_>, _>>()
                .map(Payload::Array),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Payload::reconstruct(v, attachments).map(|p| (k, p)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Payload::Object),
            other => Ok(Payload::Json(other)),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

fn is_placeholder(map: &serde_json::Map<String, Value>) -> bool {
    map.get(PLACEHOLDER_KEY).and_then(Value::as_bool) == Some(true)
}

fn contains_placeholder(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(map) => is_placeholder(map) || map.values().any(contains_placeholder),
        _ => false,
    }
}

/// An inner (multiplexed) packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub namespace: String,
    pub id: Option<u64>,
    pub data: Option<Payload>,
}

impl Packet {
    /// Namespace connect request, optionally carrying an auth object
    pub fn connect(namespace: impl Into<String>, auth: Option<Value>) -> Self {
        Self {
            kind: PacketKind::Connect,
            namespace: namespace.into(),
            id: None,
            data: auth.map(Payload::Json),
        }
    }

    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self {
            kind: PacketKind::Disconnect,
            namespace: namespace.into(),
            id: None,
            data: None,
        }
    }

    /// Named event; becomes a binary event if any argument carries binary
    pub fn event(namespace: impl Into<String>, name: &str, args: Vec<Payload>) -> Self {
        let has_binary = args.iter().any(Payload::has_binary);
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Payload::Json(Value::String(name.to_string())));
        items.extend(args);
        let data = if has_binary {
            Payload::Array(items)
        } else {
            // Binary-free nodes flatten back to plain JSON
            let mut none = Vec::new();
            let values = items.iter().map(|p| p.deconstruct(&mut none)).collect();
            Payload::Json(Value::Array(values))
        };
        Self {
            kind: if has_binary {
                PacketKind::BinaryEvent
            } else {
                PacketKind::Event
            },
            namespace: namespace.into(),
            id: None,
            data: Some(data),
        }
    }

    /// Reply to an event that requested acknowledgment
    pub fn ack(namespace: impl Into<String>, id: u64, args: Vec<Value>) -> Self {
        Self {
            kind: PacketKind::Ack,
            namespace: namespace.into(),
            id: Some(id),
            data: Some(Payload::Json(Value::Array(args))),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Event name, for event packets
    pub fn event_name(&self) -> Option<&str> {
        match (&self.kind, &self.data) {
            (PacketKind::Event | PacketKind::BinaryEvent, Some(Payload::Json(Value::Array(v)))) => {
                v.first().and_then(Value::as_str)
            }
            (PacketKind::Event | PacketKind::BinaryEvent, Some(Payload::Array(v))) => {
                v.first().and_then(Payload::as_json).and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Arguments of an event (without the name) or of an ack
    pub fn args(&self) -> Vec<Payload> {
        let items: Vec<Payload> = match &self.data {
            Some(Payload::Json(Value::Array(v))) => v.iter().cloned().map(Payload::Json).collect(),
            Some(Payload::Array(v)) => v.clone(),
            _ => Vec::new(),
        };
        match self.kind {
            PacketKind::Event | PacketKind::BinaryEvent => items.into_iter().skip(1).collect(),
            _ => items,
        }
    }
}

/// Server handshake carried by the engine "open" packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// An outer (engine-level) packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Message(Packet),
    Upgrade,
    Noop,
}

impl Frame {
    pub fn kind(&self) -> EngineKind {
        match self {
            Frame::Open(_) => EngineKind::Open,
            Frame::Close => EngineKind::Close,
            Frame::Ping => EngineKind::Ping,
            Frame::Pong => EngineKind::Pong,
            Frame::Message(_) => EngineKind::Message,
            Frame::Upgrade => EngineKind::Upgrade,
            Frame::Noop => EngineKind::Noop,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Open(_) => "open",
            Frame::Close => "close",
            Frame::Ping => "ping",
            Frame::Pong => "pong",
            Frame::Message(p) => p.kind.name(),
            Frame::Upgrade => "upgrade",
            Frame::Noop => "noop",
        }
    }
}
