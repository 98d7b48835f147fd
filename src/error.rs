use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors originating from the persistent connection
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Reconnection abandoned after {attempts} consecutive failures")]
    ReconnectExhausted { attempts: u32 },

    #[error("Connection handshake failed: {details}")]
    Handshake { details: String },

    #[error("Malformed payload dropped: {details}")]
    MalformedPayload { details: String },
}

/// Errors originating from the capture pipeline
#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("Capture source unavailable: {details}")]
    Unavailable { details: String },

    #[error("Frame encoding failed: {details}")]
    Encoding { details: String },

    #[error("Encoded frame failed payload validation")]
    InvalidPayload,
}

/// Errors originating from the credential lifecycle
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication rejected: {reason}")]
    Rejected { reason: String },

    #[error("Session expired")]
    SessionExpired,

    #[error("No credentials available")]
    NoCredentials,

    #[error("Token storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response status {status}")]
    Status { status: u16 },
}

/// Errors from the remote REST surface (camera control, service status)
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("AI service unavailable: {details}")]
    ServiceUnavailable { details: String },

    #[error("Request failed with status {status}")]
    Status { status: u16 },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Origin class used to route an error to the user-visible surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Connection,
    Camera,
    AiService,
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl VisionError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Origin class for routing, when the error maps onto one
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            VisionError::Connection(_) => Some(ErrorClass::Connection),
            VisionError::Capture(_) => Some(ErrorClass::Camera),
            VisionError::Auth(_) | VisionError::Api(_) => Some(ErrorClass::AiService),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_routing() {
        assert_eq!(
            VisionError::Connection(ConnectionError::NotConnected).class(),
            Some(ErrorClass::Connection)
        );
        assert_eq!(
            VisionError::Capture(CaptureError::InvalidPayload).class(),
            Some(ErrorClass::Camera)
        );
        assert_eq!(
            VisionError::Auth(AuthError::SessionExpired).class(),
            Some(ErrorClass::AiService)
        );
        assert_eq!(
            VisionError::component("session", "bad state").class(),
            None
        );
    }

    #[test]
    fn test_component_error_display() {
        let err = VisionError::component("capture", "source went away");
        assert_eq!(
            err.to_string(),
            "Component error in capture: source went away"
        );
    }
}
