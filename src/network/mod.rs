//! Network subsystem: socket transport and the protocol engine

pub mod backoff;
pub mod engine;
pub mod transport;
pub mod websocket;

pub use backoff::ReconnectPolicy;
pub use engine::{ConnectionState, EngineEvent, PendingAck, ProtocolEngine, SessionInfo};
pub use transport::{Connector, SocketEvent, SocketHandle};
pub use websocket::WebSocketConnector;
