use crate::api::RemoteApi;
use crate::auth::{CredentialManager, TokenStore, UserProfile};
use crate::capture::{CaptureConstraints, CapturePipeline, CaptureSource};
use crate::config::VisionConfig;
use crate::connection::{ConnectionManager, Envelope};
use crate::error::{AuthError, CaptureError, ErrorClass, VisionError};
use crate::events::{EventBus, SessionEvent};
use crate::frame::{Frame, FrameStore};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::chat::{ChatLog, ChatMessage};
use super::state::{CameraState, LinkStatus, RequestState, SessionState, SubmitRejection};
use tracing::{debug, info, warn};

/// Prompt used when the user asks for analysis without typing anything
pub const DEFAULT_PROMPT: &str = "Analyze this image and provide helpful insights.";

/// A prompt awaiting its correlated response
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: Uuid,
    pub prompt: String,
    pub submitted_at: SystemTime,
}

/// Composes the connection, capture, and credential components against the
/// session state machine.
///
/// The orchestrator enforces the single-pending-request invariant, owns the
/// append-only chat log, and is the only component that writes to the
/// persistent connection.
pub struct SessionOrchestrator {
    config: VisionConfig,
    event_bus: Arc<EventBus>,
    connection: Arc<ConnectionManager>,
    pipeline: CapturePipeline,
    credentials: Arc<CredentialManager>,
    api: RemoteApi,
    frame_store: Arc<FrameStore>,
    state: RwLock<SessionState>,
    chat: Mutex<ChatLog>,
    pending: Mutex<Option<PendingRequest>>,
    service_available: AtomicBool,
}

impl SessionOrchestrator {
    pub fn new(config: VisionConfig, source: Box<dyn CaptureSource>) -> Self {
        let event_bus = Arc::new(EventBus::new(256));
        let frame_store = Arc::new(FrameStore::new());
        let connection = Arc::new(ConnectionManager::new(
            config.connection.clone(),
            Arc::clone(&event_bus),
        ));
        let credentials = Arc::new(CredentialManager::new(
            config.server.http_url.clone(),
            TokenStore::resolve(config.auth.state_dir.as_deref()),
        ));
        let api = RemoteApi::new(config.server.http_url.clone(), Arc::clone(&credentials));
        let pipeline = CapturePipeline::new(
            config.capture.clone(),
            source,
            Arc::clone(&frame_store),
            Arc::clone(&event_bus),
        );

        Self {
            config,
            event_bus,
            connection,
            pipeline,
            credentials,
            api,
            frame_store,
            state: RwLock::new(SessionState::Unauthenticated),
            chat: Mutex::new(ChatLog::new()),
            pending: Mutex::new(None),
            service_available: AtomicBool::new(false),
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.chat.lock().messages().to_vec()
    }

    pub fn is_service_available(&self) -> bool {
        self.service_available.load(Ordering::Relaxed)
    }

    pub fn frame_store(&self) -> Arc<FrameStore> {
        Arc::clone(&self.frame_store)
    }

    /// Establish the persistent connection; reconnection is handled by the
    /// connection manager until it exhausts its attempts.
    pub fn connect(&self) {
        self.connection.connect(self.config.server.ws_url.clone());
    }

    /// Close the persistent connection deterministically
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Re-enter the session from persisted credentials, validating them
    /// opportunistically against the server.
    pub async fn resume_session(&self) -> Option<UserProfile> {
        if !self.credentials.is_authenticated() {
            return None;
        }
        match self.credentials.current_user().await {
            Ok(profile) => {
                *self.state.write() = SessionState::fresh(self.link_status());
                info!("Resumed session for {}", profile.username);
                self.refresh_service_availability().await;
                Some(profile)
            }
            Err(e) => {
                debug!("Persisted credentials no longer valid: {}", e);
                self.credentials.clear();
                *self.state.write() = SessionState::Unauthenticated;
                None
            }
        }
    }

    /// Authenticate and enter the session.
    ///
    /// The connection is attempted independently of the login outcome.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        self.credentials.login(username, password).await?;
        *self.state.write() = SessionState::fresh(self.link_status());
        self.refresh_service_availability().await;
        Ok(())
    }

    /// Leave the session: stop the camera, discard pending state, clear the
    /// chat log, and invalidate credentials. The connection is a transport
    /// concern and is left as-is.
    pub async fn logout(&self) {
        self.pipeline.stop().await;

        if let Some(pending) = self.pending.lock().take() {
            debug!("Discarding pending request {} on logout", pending.id);
        }
        self.chat.lock().clear();

        self.credentials.logout().await;
        *self.state.write() = SessionState::Unauthenticated;
        self.event_bus.publish(SessionEvent::SessionEnded {
            reason: "logout".to_string(),
        });
    }

    /// Walk the camera from Off through Starting to On.
    ///
    /// Failure leaves the camera Off and surfaces the capture error.
    pub async fn start_camera(&self) -> crate::error::Result<()> {
        if !self.state().is_authenticated() {
            return Err(VisionError::component("session", "not authenticated"));
        }
        self.set_camera(CameraState::Starting);

        let constraints = CaptureConstraints {
            width: self.config.capture.width,
            height: self.config.capture.height,
            fps: self.config.capture.fps,
        };

        if let Err(e) = self.api.start_camera(&constraints).await {
            self.set_camera(CameraState::Off);
            let error = CaptureError::Unavailable {
                details: e.to_string(),
            };
            self.event_bus.publish(SessionEvent::ComponentError {
                class: ErrorClass::Camera,
                message: error.to_string(),
            });
            return Err(error.into());
        }

        if let Err(e) = self.pipeline.start().await {
            self.set_camera(CameraState::Off);
            self.event_bus.publish(SessionEvent::ComponentError {
                class: ErrorClass::Camera,
                message: e.to_string(),
            });
            return Err(e.into());
        }

        self.set_camera(CameraState::On);
        Ok(())
    }

    /// Stop the camera and discard the held frame
    pub async fn stop_camera(&self) {
        self.pipeline.stop().await;
        if let Err(e) = self.api.stop_camera().await {
            warn!("Remote camera stop failed: {}", e);
        }
        self.frame_store.clear();
        self.set_camera(CameraState::Off);
    }

    /// Re-probe the AI service and cache the result
    pub async fn refresh_service_availability(&self) -> bool {
        let available = match self.api.service_status().await {
            Ok(available) => available,
            Err(e) => {
                debug!("Service status probe failed: {}", e);
                false
            }
        };
        self.service_available.store(available, Ordering::Relaxed);
        if !available {
            self.event_bus.publish(SessionEvent::ComponentError {
                class: ErrorClass::AiService,
                message: "AI service is not available".to_string(),
            });
        }
        available
    }

    /// Submit a prompt paired with the latest frame.
    ///
    /// Rejected without state change when any precondition fails; on
    /// acceptance a user message is appended, the request goes Pending, and
    /// one `process_image` envelope is sent.
    pub fn submit_prompt(&self, prompt: &str) -> Result<Uuid, SubmitRejection> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitRejection::EmptyPrompt);
        }

        {
            let state = self.state.read();
            let SessionState::Authenticated {
                camera,
                link,
                request,
            } = *state
            else {
                return Err(SubmitRejection::Unauthenticated);
            };
            if camera != CameraState::On {
                return Err(SubmitRejection::CameraOff);
            }
            if link != LinkStatus::Up {
                return Err(SubmitRejection::LinkDown);
            }
            if request != RequestState::Idle {
                return Err(SubmitRejection::AlreadyPending);
            }
        }
        if !self.is_service_available() {
            return Err(SubmitRejection::ServiceUnavailable);
        }
        let Some(frame) = self.frame_store.latest() else {
            return Err(SubmitRejection::NoFrame);
        };

        let request = PendingRequest {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            submitted_at: SystemTime::now(),
        };

        let request_id = request.id;
        *self.pending.lock() = Some(request);
        self.set_request(RequestState::Pending);

        let envelope = Envelope::ProcessImage {
            image_data: frame.data.as_str().to_string(),
            prompt: prompt.to_string(),
        };
        if let Err(e) = self.connection.send(envelope) {
            // The link dropped between the precondition check and the send
            self.pending.lock().take();
            self.set_request(RequestState::Idle);
            self.event_bus.publish(SessionEvent::ComponentError {
                class: ErrorClass::Connection,
                message: e.to_string(),
            });
            return Err(SubmitRejection::LinkDown);
        }

        self.chat.lock().push(ChatMessage::user(prompt));
        self.event_bus.publish(SessionEvent::RequestSubmitted {
            request_id,
            timestamp: SystemTime::now(),
        });
        info!("Submitted request {}", request_id);
        Ok(request_id)
    }

    /// Apply one event to the state machine.
    ///
    /// Feeding a deterministic event sequence through here is how the
    /// machine is tested.
    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::LinkUp { .. } => self.set_link(LinkStatus::Up),
            SessionEvent::LinkDown { .. } => self.set_link(LinkStatus::Down),
            SessionEvent::ReconnectExhausted { attempts } => {
                warn!(
                    "Reconnection exhausted after {} attempts; waiting for manual retry",
                    attempts
                );
                self.set_link(LinkStatus::Down);
            }
            SessionEvent::FrameRelayed { data } => {
                if self.state().is_authenticated() {
                    self.frame_store.replace(Frame::relayed(data));
                }
            }
            SessionEvent::ResponseArrived {
                response,
                confidence,
                processing_time,
            } => {
                let pending = self.pending.lock().take();
                match pending {
                    Some(request) if self.state().is_authenticated() => {
                        self.set_request(RequestState::Idle);
                        self.chat.lock().push(ChatMessage::assistant(
                            response,
                            confidence,
                            processing_time,
                        ));
                        debug!("Response correlated to request {}", request.id);
                    }
                    _ => {
                        // Late responses after logout are ignored, not surfaced
                        debug!("Ignoring response with no pending request");
                    }
                }
            }
            SessionEvent::RemoteError { message } => {
                if self.pending.lock().take().is_some() {
                    self.set_request(RequestState::Idle);
                }
                self.event_bus.publish(SessionEvent::ComponentError {
                    class: ErrorClass::AiService,
                    message,
                });
            }
            _ => {}
        }
    }

    /// Drive the state machine from the event bus until cancelled
    pub async fn run(&self, token: CancellationToken) {
        let mut receiver = self.event_bus.subscribe();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Orchestrator lagged behind by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        debug!("Orchestrator event loop finished");
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    #[cfg(test)]
    pub(crate) fn force_service_available(&self, available: bool) {
        self.service_available.store(available, Ordering::Relaxed);
    }

    fn link_status(&self) -> LinkStatus {
        if self.connection.is_open() {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }

    fn set_camera(&self, camera: CameraState) {
        let mut state = self.state.write();
        if let SessionState::Authenticated {
            camera: ref mut current,
            ..
        } = *state
        {
            *current = camera;
        }
    }

    fn set_link(&self, link: LinkStatus) {
        let mut state = self.state.write();
        if let SessionState::Authenticated {
            link: ref mut current,
            ..
        } = *state
        {
            *current = link;
        }
    }

    fn set_request(&self, request: RequestState) {
        let mut state = self.state.write();
        if let SessionState::Authenticated {
            request: ref mut current,
            ..
        } = *state
        {
            *current = request;
        }
    }
}
