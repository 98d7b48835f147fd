pub mod api;
pub mod auth;
pub mod capture;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod frame;
pub mod session;

pub use api::RemoteApi;
pub use auth::{should_retry, CredentialManager, CredentialPair, RequestMeta, TokenStore, UserProfile};
pub use capture::{CaptureConstraints, CapturePipeline, CaptureSource, TestPatternSource};
pub use config::VisionConfig;
pub use connection::{ConnectionManager, Envelope, LinkState, LlmOutcome, ReconnectPolicy};
pub use error::{
    ApiError, AuthError, CaptureError, ConnectionError, ErrorClass, Result, VisionError,
};
pub use events::{EventBus, EventFilter, EventReceiver, SessionEvent};
pub use frame::{Frame, FrameStore};
pub use session::{
    CameraState, ChatLog, ChatMessage, LinkStatus, PendingRequest, RequestState, Role,
    SessionOrchestrator, SessionState, SubmitRejection,
};
