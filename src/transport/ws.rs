//! Websocket implementation of the link seam.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::link::{Connector, Link, LinkSink, LinkStream};
use crate::error::{ConnectionError, TransportFault};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens a fresh websocket to the broker endpoint on every call.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self) -> Result<Link, ConnectionError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        debug!(url = %self.url, "websocket opened");
        let (write, read) = socket.split();
        Ok(Link { sink: Box::new(WsSink(write)), stream: Box::new(WsStream(read)) })
    }
}

struct WsSink(SplitSink<Socket, Message>);

#[async_trait]
impl LinkSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportFault> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportFault::Io(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

struct WsStream(SplitStream<Socket>);

#[async_trait]
impl LinkStream for WsStream {
    async fn recv(&mut self) -> Option<Result<String, TransportFault>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportFault::Io(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!(len = bytes.len(), "dropping non-utf8 binary message"),
                },
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }
}
