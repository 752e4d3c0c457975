//! Socket abstraction used by the protocol engine
//!
//! The engine never touches a concrete socket. A [`Connector`] opens one
//! and hands back a pair of channels; whatever drives the real socket sits
//! on the other side.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::protocol::WireMessage;

/// Something observed on an open socket
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Message(WireMessage),
    /// Peer closed the socket, with its reason if it gave one
    Closed(Option<String>),
    Error(String),
}

/// Channel ends of an open socket.
///
/// Dropping `outgoing` closes the socket.
#[derive(Debug)]
pub struct SocketHandle {
    pub outgoing: mpsc::UnboundedSender<WireMessage>,
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

impl SocketHandle {
    /// Create a handle plus the far ends of both channels
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<WireMessage>,
        mpsc::UnboundedSender<SocketEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: out_tx,
                incoming: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens sockets to an endpoint URL
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<SocketHandle, ConnectionError>>;
}
