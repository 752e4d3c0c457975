//! Wire protocol: packet types, codec and application event schema

pub mod codec;
pub mod messages;
pub mod packet;

pub use codec::{encode, Decoder};
pub use packet::{EngineKind, Frame, OpenHandshake, Packet, PacketKind, Payload, WireMessage};
