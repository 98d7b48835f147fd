use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::events::{EventBus, SessionEvent};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::envelope::{self, Envelope};

/// Lifecycle state of the logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Tracks consecutive reconnect attempts and computes the linear backoff
/// schedule. The counter resets to zero on every successful open.
#[derive(Debug)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Record a failed attempt. Returns the delay before the next scheduled
    /// attempt, or `None` once the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt > self.max_attempts {
            None
        } else {
            Some(self.base_delay * self.attempt)
        }
    }

    /// Reset the counter after a successful open
    pub fn record_open(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the one persistent duplex connection to the analysis service.
///
/// The underlying socket is destroyed and recreated on every reconnect,
/// never mutated in place. Lifecycle events and inbound envelopes are
/// published on the event bus.
pub struct ConnectionManager {
    config: ConnectionConfig,
    event_bus: Arc<EventBus>,
    state: Arc<RwLock<LinkState>>,
    outbound: Arc<RwLock<Option<mpsc::UnboundedSender<Envelope>>>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            event_bus,
            state: Arc::new(RwLock::new(LinkState::Idle)),
            outbound: Arc::new(RwLock::new(None)),
            shutdown: Mutex::new(None),
        }
    }

    /// Current lifecycle state of the link
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Establish the connection and keep it alive until `disconnect()`.
    ///
    /// Every unplanned close schedules a reconnect attempt after
    /// `base_delay x attempt_number`; after `max_attempts` consecutive
    /// failures a terminal `ReconnectExhausted` event is published and the
    /// manager stops. Calling `connect` again restarts the cycle.
    pub fn connect(&self, address: String) {
        // Replace any previous link task
        if let Some(previous) = self.shutdown.lock().take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        *self.shutdown.lock() = Some(token.clone());

        info!("Connecting to {}", address);

        let config = self.config.clone();
        let event_bus = Arc::clone(&self.event_bus);
        let state = Arc::clone(&self.state);
        let outbound = Arc::clone(&self.outbound);

        tokio::spawn(async move {
            run_link(address, config, event_bus, state, outbound, token).await;
        });
    }

    /// Transmit an envelope over the open connection
    pub fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        let guard = self.outbound.read();
        match guard.as_ref() {
            Some(tx) if tx.send(envelope).is_ok() => Ok(()),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    /// Close the connection deterministically and suppress reconnection.
    /// Closing is idempotent.
    pub fn disconnect(&self) {
        if let Some(token) = self.shutdown.lock().take() {
            info!("Disconnecting");
            token.cancel();
        }
        *self.outbound.write() = None;
        *self.state.write() = LinkState::Closed;
    }
}

/// Connect-and-drive loop for one logical connection.
async fn run_link(
    address: String,
    config: ConnectionConfig,
    event_bus: Arc<EventBus>,
    state: Arc<RwLock<LinkState>>,
    outbound: Arc<RwLock<Option<mpsc::UnboundedSender<Envelope>>>>,
    token: CancellationToken,
) {
    let mut policy = ReconnectPolicy::new(config.base_delay(), config.max_attempts);

    loop {
        if token.is_cancelled() {
            break;
        }
        *state.write() = LinkState::Connecting;

        match connect_async(address.as_str()).await {
            Ok((socket, _response)) => {
                policy.record_open();
                let (tx, rx) = mpsc::unbounded_channel();
                *outbound.write() = Some(tx);
                *state.write() = LinkState::Open;
                event_bus.publish(SessionEvent::LinkUp {
                    timestamp: SystemTime::now(),
                });

                let planned = drive_socket(socket, rx, &event_bus, &token).await;

                *outbound.write() = None;
                *state.write() = LinkState::Closed;
                event_bus.publish(SessionEvent::LinkDown {
                    timestamp: SystemTime::now(),
                });

                if planned {
                    break;
                }
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", address, e);
            }
        }

        match policy.next_delay() {
            Some(delay) => {
                event_bus.publish(SessionEvent::ReconnectScheduled {
                    attempt: policy.attempt(),
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
            None => {
                *state.write() = LinkState::Closed;
                event_bus.publish(SessionEvent::ReconnectExhausted {
                    attempts: config.max_attempts,
                });
                break;
            }
        }
    }

    debug!("Link task for {} finished", address);
}

/// Drive one open socket until it closes. Returns true when the close was
/// planned (cancellation), false on any unplanned close.
async fn drive_socket(
    socket: Socket,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    event_bus: &EventBus,
    token: &CancellationToken,
) -> bool {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return true;
            }
            out = outbound_rx.recv() => {
                let Some(env) = out else { return false };
                match envelope::encode(&env) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            warn!("Send failed: {}", e);
                            return false;
                        }
                    }
                    Err(e) => warn!("Failed to encode outbound envelope: {}", e),
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(env) = envelope::decode(&text) {
                            dispatch_inbound(env, event_bus);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                    Some(Err(e)) => {
                        debug!("Socket error: {}", e);
                        return false;
                    }
                }
            }
        }
    }
}

/// Translate an inbound envelope into a session event
fn dispatch_inbound(envelope: Envelope, event_bus: &EventBus) {
    match envelope {
        Envelope::Frame { data } => {
            event_bus.publish(SessionEvent::FrameRelayed { data });
        }
        Envelope::LlmResponse { data } => {
            event_bus.publish(SessionEvent::ResponseArrived {
                response: data.response,
                confidence: data.confidence,
                processing_time: data.processing_time,
            });
        }
        Envelope::Error { message } => {
            event_bus.publish(SessionEvent::RemoteError { message });
        }
        Envelope::ProcessImage { .. } => {
            debug!("Ignoring outbound-only envelope received from server");
        }
    }
}
