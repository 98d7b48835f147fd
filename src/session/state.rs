use thiserror::Error;

/// Camera sub-state within an authenticated session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Off,
    Starting,
    On,
}

/// Connection sub-state as the session observes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Down,
    Up,
}

/// Request sub-state; at most one AI request is outstanding at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Pending,
}

/// The session state machine observed and driven by surrounding UI code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated {
        camera: CameraState,
        link: LinkStatus,
        request: RequestState,
    },
}

impl SessionState {
    /// Fresh post-login state: camera off, request idle, link as observed
    pub fn fresh(link: LinkStatus) -> Self {
        SessionState::Authenticated {
            camera: CameraState::Off,
            link,
            request: RequestState::Idle,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn camera(&self) -> Option<CameraState> {
        match self {
            SessionState::Authenticated { camera, .. } => Some(*camera),
            SessionState::Unauthenticated => None,
        }
    }

    pub fn link(&self) -> Option<LinkStatus> {
        match self {
            SessionState::Authenticated { link, .. } => Some(*link),
            SessionState::Unauthenticated => None,
        }
    }

    pub fn request(&self) -> Option<RequestState> {
        match self {
            SessionState::Authenticated { request, .. } => Some(*request),
            SessionState::Unauthenticated => None,
        }
    }
}

/// Why a prompt submission was rejected; matches the first failing
/// precondition and produces no state change
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Camera is not active")]
    CameraOff,

    #[error("No connection to the analysis service")]
    LinkDown,

    #[error("A request is already pending")]
    AlreadyPending,

    #[error("AI service is not available")]
    ServiceUnavailable,

    #[error("No frame available to process")]
    NoFrame,

    #[error("Prompt is empty")]
    EmptyPrompt,
}
