//! Transport connection: the single persistent link to the message broker.
//!
//! DESIGN
//! ======
//! `Connection` is an explicitly owned handle; the session that owns it is the
//! only caller. After the STOMP handshake a driver task owns the link: it
//! drains the outbound queue, forwards inbound frames, sends heart-beats and,
//! when the link drops, retries with a fixed delay up to the configured bound.
//! A link that stays silent for twice the negotiated incoming heart-beat
//! interval counts as dropped.
//!
//! The driver reports through one channel. The handle applies those reports to
//! its state inside `next_event`, so lifecycle listeners always run on the
//! owner's task, in registration order.
//!
//! LIFECYCLE
//! =========
//! Disconnected → Connecting → Connected → (link lost) Reconnecting
//!   → Connected (attempt succeeded) | Failed (bound exhausted)
//!
//! Reconnecting never restores subscriptions; the owner re-subscribes after
//! it observes `ConnectionEvent::Connected`.

mod link;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use link::{Connector, Credential, Link, LinkSink, LinkStream};

use std::sync::Arc;
use std::time::Duration;

use frames::stomp::{self, Command, StompFrame};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{ConnectionError, TransportFault};

/// How long `disconnect` waits for the driver to flush `DISCONNECT`.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Missed incoming heart-beats tolerated before the link is declared dead.
const HEARTBEAT_TOLERANCE: u32 = 2;

// =============================================================================
// TYPES
// =============================================================================

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Identity of one established link: driver generation plus reconnect count.
///
/// Subscriptions remember the link they were issued on; a different live link
/// means the broker has forgotten them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId {
    driver: u64,
    link: u32,
}

#[cfg(test)]
impl LinkId {
    pub(crate) fn fake(link: u32) -> Self {
        Self { driver: 0, link }
    }
}

/// Lifecycle notification delivered to listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// A broker `MESSAGE` frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub destination: String,
    pub subscription: Option<String>,
    pub body: String,
}

/// What `Connection::next_event` yields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Lifecycle(ConnectionEvent),
    Message(InboundMessage),
}

/// Outbound side used by subscription bookkeeping.
pub trait FrameSender {
    /// The current link, `None` unless connected.
    fn live_link(&self) -> Option<LinkId>;

    /// Queue a frame on the current link. Returns `false` when not connected.
    fn send_frame(&self, frame: StompFrame) -> bool;
}

type Listener = Box<dyn FnMut(&ConnectionEvent) + Send>;

struct Outbound {
    link: LinkId,
    text: String,
}

enum DriverEvent {
    Frame { link: LinkId, frame: StompFrame },
    Lost { link: LinkId, fault: TransportFault },
    Reconnected { link: LinkId },
    Failed { driver: u64, attempts: u32 },
}

// =============================================================================
// CONNECTION
// =============================================================================

pub struct Connection {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    state: ConnectionState,
    link: Option<LinkId>,
    next_driver: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    driver: Option<JoinHandle<()>>,
    listeners: Vec<Listener>,
}

impl Connection {
    #[must_use]
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            state: ConnectionState::Disconnected,
            link: None,
            next_driver: 0,
            outbound: None,
            events_tx,
            events_rx,
            driver: None,
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Open the link and complete the STOMP handshake.
    ///
    /// Already connected is a no-op. A failed handshake is not retried; the
    /// error listeners fire and the state becomes `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the socket cannot be opened, the
    /// broker rejects the credential, or `CONNECTED` never arrives.
    pub async fn connect(&mut self, credential: Credential) -> Result<(), ConnectionError> {
        if self.is_connected() {
            debug!("broker already connected");
            return Ok(());
        }
        self.stop_driver();
        self.state = ConnectionState::Connecting;

        let (link, incoming) = match handshake(self.connector.as_ref(), &credential, &self.config).await {
            Ok(established) => established,
            Err(e) => {
                warn!(error = %e, "broker handshake failed");
                self.state = ConnectionState::Failed;
                self.emit(&ConnectionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        self.next_driver += 1;
        let id = LinkId { driver: self.next_driver, link: 0 };
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            connector: Arc::clone(&self.connector),
            credential,
            config: self.config.clone(),
            events: self.events_tx.clone(),
            outbound: outbound_rx,
            link: id,
        };
        self.driver = Some(tokio::spawn(driver.run(link, incoming)));
        self.outbound = Some(outbound_tx);
        self.link = Some(id);
        self.state = ConnectionState::Connected;

        info!(driver = id.driver, incoming_heartbeat = ?incoming, "broker connected");
        self.emit(&ConnectionEvent::Connected);
        Ok(())
    }

    /// Close the link. Listeners see `Disconnected` once per call that
    /// actually changed state.
    pub async fn disconnect(&mut self) {
        let was = self.state;
        let graceful = was == ConnectionState::Connected;

        if let (Some(tx), Some(link)) = (self.outbound.take(), self.link) {
            if graceful {
                let _ = tx.send(Outbound { link, text: stomp::encode(&StompFrame::disconnect()) });
            }
        }
        if let Some(mut handle) = self.driver.take() {
            if !graceful || tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.link = None;
        self.state = ConnectionState::Disconnected;

        if was != ConnectionState::Disconnected {
            info!("broker disconnected");
            self.emit(&ConnectionEvent::Disconnected);
        }
    }

    /// Publish a JSON payload to a destination.
    ///
    /// Not connected is a logged no-op; `false` means nothing was queued.
    /// `true` is not a delivery guarantee.
    pub fn send(&self, destination: &str, payload: &Value) -> bool {
        if !self.is_connected() {
            warn!(destination, "not connected; dropping send");
            return false;
        }
        self.send_frame(StompFrame::send(destination, payload.to_string()))
    }

    /// Wait for the next message or lifecycle change.
    ///
    /// Cancel-safe: dropping the future loses nothing. Returns `None` only if
    /// the event channel is gone, which cannot happen while `self` is alive.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            let event = self.events_rx.recv().await?;
            if let Some(event) = self.absorb(event) {
                return Some(event);
            }
        }
    }

    /// Register a lifecycle listener. Listeners run in registration order.
    pub fn on_event<F>(&mut self, listener: F)
    where
        F: FnMut(&ConnectionEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn on_connected<F>(&mut self, mut listener: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_event(move |event| {
            if *event == ConnectionEvent::Connected {
                listener();
            }
        });
    }

    pub fn on_disconnected<F>(&mut self, mut listener: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_event(move |event| {
            if *event == ConnectionEvent::Disconnected {
                listener();
            }
        });
    }

    pub fn on_error<F>(&mut self, mut listener: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_event(move |event| {
            if let ConnectionEvent::Error(message) = event {
                listener(message);
            }
        });
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    fn emit(&mut self, event: &ConnectionEvent) {
        for listener in &mut self.listeners {
            listener(event);
        }
    }

    fn stop_driver(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
        self.outbound = None;
        self.link = None;
    }

    fn owns_driver(&self, driver: u64) -> bool {
        self.link.is_some_and(|link| link.driver == driver)
    }

    fn absorb(&mut self, event: DriverEvent) -> Option<TransportEvent> {
        match event {
            DriverEvent::Frame { link, frame } => {
                if self.link != Some(link) {
                    return None;
                }
                if frame.command != Command::Message {
                    debug!(command = frame.command.as_str(), "ignoring broker frame");
                    return None;
                }
                Some(TransportEvent::Message(InboundMessage {
                    destination: frame.header("destination").unwrap_or_default().to_owned(),
                    subscription: frame.header("subscription").map(str::to_owned),
                    body: frame.body,
                }))
            }
            DriverEvent::Lost { link, fault } => {
                if self.link != Some(link) {
                    return None;
                }
                warn!(error = %fault, "broker link lost; reconnecting");
                self.state = ConnectionState::Reconnecting;
                self.emit(&ConnectionEvent::Disconnected);
                Some(TransportEvent::Lifecycle(ConnectionEvent::Disconnected))
            }
            DriverEvent::Reconnected { link } => {
                if !self.owns_driver(link.driver) {
                    return None;
                }
                self.link = Some(link);
                self.state = ConnectionState::Connected;
                info!(driver = link.driver, link = link.link, "broker link restored");
                self.emit(&ConnectionEvent::Connected);
                Some(TransportEvent::Lifecycle(ConnectionEvent::Connected))
            }
            DriverEvent::Failed { driver, attempts } => {
                if !self.owns_driver(driver) {
                    return None;
                }
                self.driver = None;
                self.outbound = None;
                self.link = None;
                self.state = ConnectionState::Failed;
                let message = format!("gave up after {attempts} reconnect attempts");
                warn!(attempts, "broker reconnect exhausted");
                self.emit(&ConnectionEvent::Error(message.clone()));
                Some(TransportEvent::Lifecycle(ConnectionEvent::Error(message)))
            }
        }
    }
}

impl FrameSender for Connection {
    fn live_link(&self) -> Option<LinkId> {
        self.link.filter(|_| self.is_connected())
    }

    fn send_frame(&self, frame: StompFrame) -> bool {
        let (Some(tx), Some(link)) = (&self.outbound, self.live_link()) else {
            return false;
        };
        tx.send(Outbound { link, text: stomp::encode(&frame) }).is_ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Open a link and wait for `CONNECTED`. Also returns the negotiated interval
/// at which the broker promised to send heart-beats, if any.
async fn handshake(
    connector: &dyn Connector,
    credential: &Credential,
    config: &TransportConfig,
) -> Result<(Link, Option<Duration>), ConnectionError> {
    let mut link = connector.open().await?;
    let heartbeat_ms = u64::try_from(config.heartbeat.as_millis()).unwrap_or(u64::MAX);
    let connect = StompFrame::connect(config.host(), credential.token(), heartbeat_ms);
    link.sink
        .send(stomp::encode(&connect))
        .await
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;

    match tokio::time::timeout(config.handshake_timeout, await_connected(link.stream.as_mut())).await {
        Ok(Ok(server_beat)) => Ok((link, incoming_heartbeat(server_beat, config.heartbeat))),
        Ok(Err(e)) => {
            link.sink.close().await;
            Err(e)
        }
        Err(_) => {
            link.sink.close().await;
            Err(ConnectionError::Timeout)
        }
    }
}

/// Wait for `CONNECTED` and return its `heart-beat` header.
async fn await_connected(stream: &mut dyn LinkStream) -> Result<Option<String>, ConnectionError> {
    loop {
        let text = match stream.recv().await {
            None => return Err(ConnectionError::Closed),
            Some(Err(e)) => return Err(ConnectionError::Connect(e.to_string())),
            Some(Ok(text)) => text,
        };
        let Some(frame) = stomp::decode(&text)? else {
            continue;
        };
        match frame.command {
            Command::Connected => return Ok(frame.header("heart-beat").map(str::to_owned)),
            Command::Error => {
                let message = frame.header("message").unwrap_or(frame.body.as_str());
                return Err(ConnectionError::Rejected(message.to_owned()));
            }
            other => debug!(command = other.as_str(), "frame before CONNECTED ignored"),
        }
    }
}

/// STOMP 1.2 negotiation: the broker's `sx` against our wanted `cy`; zero on
/// either side disables the check.
fn incoming_heartbeat(server_beat: Option<String>, wanted: Duration) -> Option<Duration> {
    let sx: u64 = server_beat?.split(',').next()?.trim().parse().ok()?;
    if sx == 0 || wanted.is_zero() {
        return None;
    }
    Some(wanted.max(Duration::from_millis(sx)))
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    connector: Arc<dyn Connector>,
    credential: Credential,
    config: TransportConfig,
    events: mpsc::UnboundedSender<DriverEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    link: LinkId,
}

impl Driver {
    async fn run(mut self, mut link: Link, mut incoming: Option<Duration>) {
        loop {
            let Some(fault) = self.pump(&mut link, incoming).await else {
                return;
            };
            if self.events.send(DriverEvent::Lost { link: self.link, fault }).is_err() {
                return;
            }
            let Some(next) = self.reconnect().await else {
                let _ = self.events.send(DriverEvent::Failed {
                    driver: self.link.driver,
                    attempts: self.config.max_reconnect_attempts,
                });
                return;
            };
            (link, incoming) = next;
            self.link.link += 1;
            if self.events.send(DriverEvent::Reconnected { link: self.link }).is_err() {
                return;
            }
        }
    }

    async fn reconnect(&self) -> Option<(Link, Option<Duration>)> {
        for attempt in 1..=self.config.max_reconnect_attempts {
            tokio::time::sleep(self.config.reconnect_delay).await;
            match handshake(self.connector.as_ref(), &self.credential, &self.config).await {
                Ok(established) => {
                    info!(attempt, "broker reconnect succeeded");
                    return Some(established);
                }
                Err(e) => warn!(attempt, error = %e, "broker reconnect attempt failed"),
            }
        }
        None
    }

    /// Run one link until it faults (`Some`) or the handle hangs up (`None`).
    async fn pump(&mut self, link: &mut Link, incoming: Option<Duration>) -> Option<TransportFault> {
        let Link { sink, stream } = link;
        let beat = !self.config.heartbeat.is_zero();
        let period = if beat { self.config.heartbeat } else { Duration::from_secs(3600) };
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        let watch = incoming.is_some();
        let limit = incoming.map_or(Duration::from_secs(3600), |interval| interval * HEARTBEAT_TOLERANCE);
        let silence = tokio::time::sleep(limit);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                out = self.outbound.recv() => match out {
                    Some(Outbound { link: target, text }) => {
                        if target != self.link {
                            debug!("dropping frame queued for a previous link");
                            continue;
                        }
                        if let Err(fault) = sink.send(text).await {
                            return Some(fault);
                        }
                    }
                    None => {
                        sink.close().await;
                        return None;
                    }
                },
                inbound = stream.recv() => match inbound {
                    Some(Ok(text)) => {
                        if watch {
                            silence.as_mut().reset(Instant::now() + limit);
                        }
                        match stomp::decode(&text) {
                            Ok(Some(frame)) if frame.command == Command::Error => {
                                let message = frame.header("message").unwrap_or(frame.body.as_str()).to_owned();
                                sink.close().await;
                                return Some(TransportFault::Broker(message));
                            }
                            Ok(Some(frame)) => {
                                if self.events.send(DriverEvent::Frame { link: self.link, frame }).is_err() {
                                    return None;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "dropping undecodable broker frame"),
                        }
                    }
                    Some(Err(fault)) => return Some(fault),
                    None => return Some(TransportFault::Closed),
                },
                () = &mut silence, if watch => {
                    sink.close().await;
                    return Some(TransportFault::HeartbeatTimeout(limit));
                }
                _ = ticker.tick(), if beat => {
                    if let Err(fault) = sink.send(stomp::heartbeat().to_owned()).await {
                        return Some(fault);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
