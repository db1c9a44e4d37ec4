//! Scripted in-memory broker links for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::link::{Connector, Link, LinkSink, LinkStream};
use crate::config::TransportConfig;
use crate::error::{ConnectionError, TransportFault};

pub(crate) const CONNECTED_FRAME: &str = "CONNECTED\nversion:1.2\n\n\0";

/// What the next `open` call does.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Open and answer `CONNECTED`.
    Accept,
    /// Open and answer `CONNECTED` promising server heart-beats every `ms`.
    AcceptWithHeartbeat(u64),
    /// Open and answer `ERROR` with this message.
    Reject(String),
    /// Fail to open.
    Refuse,
}

/// Test side of one opened link.
#[derive(Clone)]
pub(crate) struct Peer {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl Peer {
    /// Deliver wire text to the client.
    pub(crate) fn push(&self, text: &str) {
        if let Some(tx) = self.tx.lock().expect("peer mutex should lock").as_ref() {
            let _ = tx.send(text.to_owned());
        }
    }

    /// Drop the server side so the client stream ends.
    pub(crate) fn drop_link(&self) {
        self.tx.lock().expect("peer mutex should lock").take();
    }

    /// Everything the client wrote, heart-beats included.
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("peer mutex should lock").clone()
    }

    /// Client frames only, heart-beats removed.
    pub(crate) fn sent_frames(&self) -> Vec<String> {
        self.sent().into_iter().filter(|text| text != "\n").collect()
    }

    pub(crate) fn was_closed(&self) -> bool {
        *self.closed.lock().expect("peer mutex should lock")
    }
}

#[derive(Default)]
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    peers: Mutex<Vec<Peer>>,
}

impl MockConnector {
    pub(crate) fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into_iter().collect()), peers: Mutex::default() })
    }

    pub(crate) fn peer(&self, index: usize) -> Peer {
        self.peers.lock().expect("peers mutex should lock")[index].clone()
    }

    pub(crate) fn opened(&self) -> usize {
        self.peers.lock().expect("peers mutex should lock").len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> Result<Link, ConnectionError> {
        let next = self
            .script
            .lock()
            .expect("script mutex should lock")
            .pop_front()
            .unwrap_or(Script::Refuse);
        if matches!(next, Script::Refuse) {
            return Err(ConnectionError::Connect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match next {
            Script::Accept => {
                let _ = tx.send(CONNECTED_FRAME.to_owned());
            }
            Script::AcceptWithHeartbeat(ms) => {
                let _ = tx.send(format!("CONNECTED\nversion:1.2\nheart-beat:{ms},0\n\n\0"));
            }
            Script::Reject(message) => {
                let _ = tx.send(format!("ERROR\nmessage:{message}\n\n\0"));
            }
            Script::Refuse => {}
        }

        let peer = Peer {
            tx: Arc::new(Mutex::new(Some(tx))),
            sent: Arc::default(),
            closed: Arc::default(),
        };
        self.peers.lock().expect("peers mutex should lock").push(peer.clone());
        Ok(Link {
            sink: Box::new(MockSink { peer: peer.clone() }),
            stream: Box::new(MockStream { rx }),
        })
    }
}

struct MockSink {
    peer: Peer,
}

#[async_trait]
impl LinkSink for MockSink {
    async fn send(&mut self, text: String) -> Result<(), TransportFault> {
        if self.peer.tx.lock().expect("peer mutex should lock").is_none() {
            return Err(TransportFault::Closed);
        }
        self.peer.sent.lock().expect("peer mutex should lock").push(text);
        Ok(())
    }

    async fn close(&mut self) {
        *self.peer.closed.lock().expect("peer mutex should lock") = true;
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl LinkStream for MockStream {
    async fn recv(&mut self) -> Option<Result<String, TransportFault>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Transport tuning with short, deterministic timings.
pub(crate) fn fast_config(max_reconnect_attempts: u32) -> TransportConfig {
    TransportConfig {
        ws_url: "ws://broker.test:8080/ws".into(),
        reconnect_delay: Duration::from_millis(3000),
        max_reconnect_attempts,
        heartbeat: Duration::ZERO,
        handshake_timeout: Duration::from_secs(1),
    }
}

/// Poll until `cond` holds, sleeping between checks.
pub(crate) async fn wait_until<F>(cond: F)
where
    F: Fn() -> bool,
{
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
