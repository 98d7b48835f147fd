use crate::error::ErrorClass;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Persistent link was established
    LinkUp { timestamp: SystemTime },
    /// Persistent link was lost
    LinkDown { timestamp: SystemTime },
    /// A reconnect attempt has been scheduled
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// Reconnection abandoned after consecutive failures
    ReconnectExhausted { attempts: u32 },
    /// The local pipeline produced an encoded frame
    FrameCaptured {
        byte_len: usize,
        quality: u8,
        timestamp: SystemTime,
    },
    /// The server relayed a frame over the persistent link
    FrameRelayed { data: String },
    /// Camera pipeline became active
    CameraStarted { timestamp: SystemTime },
    /// Camera pipeline was stopped
    CameraStopped { timestamp: SystemTime },
    /// A prompt was accepted and sent to the remote service
    RequestSubmitted {
        request_id: Uuid,
        timestamp: SystemTime,
    },
    /// Assistant response arrived for the pending request
    ResponseArrived {
        response: String,
        confidence: f64,
        processing_time: f64,
    },
    /// The remote service reported an error over the link
    RemoteError { message: String },
    /// A classified error for the user-visible surfaces
    ComponentError { class: ErrorClass, message: String },
    /// The session ended (logout or expiry)
    SessionEnded { reason: String },
}

impl SessionEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            SessionEvent::LinkUp { timestamp }
            | SessionEvent::LinkDown { timestamp }
            | SessionEvent::FrameCaptured { timestamp, .. }
            | SessionEvent::CameraStarted { timestamp }
            | SessionEvent::CameraStopped { timestamp }
            | SessionEvent::RequestSubmitted { timestamp, .. } => *timestamp,
            _ => SystemTime::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SessionEvent::LinkUp { .. } => "Connected to analysis service".to_string(),
            SessionEvent::LinkDown { .. } => "Lost connection to analysis service".to_string(),
            SessionEvent::ReconnectScheduled { attempt, delay_ms } => {
                format!("Reconnect attempt {} scheduled in {}ms", attempt, delay_ms)
            }
            SessionEvent::ReconnectExhausted { attempts } => {
                format!("Reconnection abandoned after {} attempts", attempts)
            }
            SessionEvent::FrameCaptured {
                byte_len, quality, ..
            } => {
                format!("Captured frame: {} bytes at quality {}", byte_len, quality)
            }
            SessionEvent::FrameRelayed { data } => {
                format!("Relayed frame received ({} chars)", data.len())
            }
            SessionEvent::CameraStarted { .. } => "Camera started".to_string(),
            SessionEvent::CameraStopped { .. } => "Camera stopped".to_string(),
            SessionEvent::RequestSubmitted { request_id, .. } => {
                format!("Request {} submitted", request_id)
            }
            SessionEvent::ResponseArrived {
                confidence,
                processing_time,
                ..
            } => {
                format!(
                    "Response arrived (confidence {:.2}, {:.2}s)",
                    confidence, processing_time
                )
            }
            SessionEvent::RemoteError { message } => format!("Remote error: {}", message),
            SessionEvent::ComponentError { class, message } => {
                format!("Error ({:?}): {}", class, message)
            }
            SessionEvent::SessionEnded { reason } => format!("Session ended: {}", reason),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::LinkUp { .. } => "link_up",
            SessionEvent::LinkDown { .. } => "link_down",
            SessionEvent::ReconnectScheduled { .. } => "reconnect_scheduled",
            SessionEvent::ReconnectExhausted { .. } => "reconnect_exhausted",
            SessionEvent::FrameCaptured { .. } => "frame_captured",
            SessionEvent::FrameRelayed { .. } => "frame_relayed",
            SessionEvent::CameraStarted { .. } => "camera_started",
            SessionEvent::CameraStopped { .. } => "camera_stopped",
            SessionEvent::RequestSubmitted { .. } => "request_submitted",
            SessionEvent::ResponseArrived { .. } => "response_arrived",
            SessionEvent::RemoteError { .. } => "remote_error",
            SessionEvent::ComponentError { .. } => "component_error",
            SessionEvent::SessionEnded { .. } => "session_ended",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SessionEvent) -> usize {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        // Log important events at appropriate levels
        match &event {
            SessionEvent::LinkUp { .. } => info!("Connected to analysis service"),
            SessionEvent::LinkDown { .. } => warn!("Lost connection to analysis service"),
            SessionEvent::ReconnectExhausted { attempts } => {
                error!("Reconnection abandoned after {} attempts", attempts);
            }
            SessionEvent::ComponentError { class, message } => {
                error!("Component error ({:?}): {}", class, message);
            }
            SessionEvent::SessionEnded { reason } => info!("Session ended: {}", reason),
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        // A send error only means there are no subscribers right now
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&SessionEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<SessionEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return None;
                }
            }
        }
    }
}
