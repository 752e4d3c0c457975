//! WebSocket connector over tokio-tungstenite
//!
//! Each connection gets a pump task that moves frames between the socket
//! and the [`SocketHandle`] channels. The pump ends when either side goes
//! away.

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ConnectionError;
use crate::network::transport::{Connector, SocketEvent, SocketHandle};
use crate::protocol::WireMessage;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Production connector
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<SocketHandle, ConnectionError>> {
        let url = url.to_string();
        async move {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;
            tracing::debug!("WebSocket open to {}", url);

            let (handle, outgoing, incoming) = SocketHandle::pair();
            tokio::spawn(pump(stream, outgoing, incoming));
            Ok(handle)
        }
        .boxed()
    }
}

async fn pump(
    stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<WireMessage>,
    incoming: mpsc::UnboundedSender<SocketEvent>,
) {
    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            message = outgoing.recv() => {
                let Some(message) = message else {
                    // Engine dropped the socket
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let frame = match message {
                    WireMessage::Text(text) => Message::Text(text.into()),
                    WireMessage::Binary(data) => Message::Binary(data),
                };
                if let Err(e) = sink.send(frame).await {
                    let _ = incoming.send(SocketEvent::Error(e.to_string()));
                    break;
                }
            }
            frame = stream.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => {
                        SocketEvent::Message(WireMessage::Text(text.as_str().to_owned()))
                    }
                    Some(Ok(Message::Binary(data))) => SocketEvent::Message(WireMessage::Binary(data)),
                    Some(Ok(Message::Ping(data))) => {
                        // WebSocket-level ping, distinct from the engine heartbeat
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            tracing::debug!("Failed to answer WebSocket ping: {}", e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        SocketEvent::Closed(frame.map(|f| f.reason.as_str().to_owned()))
                    }
                    Some(Err(e)) => SocketEvent::Error(e.to_string()),
                    None => SocketEvent::Closed(None),
                };
                let terminal = !matches!(event, SocketEvent::Message(_));
                if incoming.send(event).is_err() || terminal {
                    break;
                }
            }
        }
    }
    tracing::debug!("WebSocket pump finished");
}
