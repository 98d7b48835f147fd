use crate::auth::CredentialManager;
use crate::capture::CaptureConstraints;
use crate::error::ApiError;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info};

/// REST surface for camera control and AI service status.
///
/// Camera endpoints go through the authorized path (and so through the
/// transparent refresh cycle); the status probe is unauthenticated.
pub struct RemoteApi {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
}

impl RemoteApi {
    pub fn new(base_url: String, credentials: Arc<CredentialManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            credentials,
        }
    }

    /// Ask the backend to start its camera feed
    pub async fn start_camera(&self, constraints: &CaptureConstraints) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "width": constraints.width,
            "height": constraints.height,
            "fps": constraints.fps,
        });
        let response = self
            .credentials
            .authorized(Method::POST, "/camera/start", Some(body))
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status().as_u16(),
            });
        }
        info!("Remote camera started");
        Ok(())
    }

    /// Ask the backend to stop its camera feed
    pub async fn stop_camera(&self) -> Result<(), ApiError> {
        let response = self
            .credentials
            .authorized(Method::POST, "/camera/stop", None)
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status().as_u16(),
            });
        }
        info!("Remote camera stopped");
        Ok(())
    }

    /// Probe whether the AI service is reachable
    pub async fn service_status(&self) -> Result<bool, ApiError> {
        let result = self
            .http
            .get(format!("{}/llm/status", self.base_url))
            .send()
            .await;
        match result {
            Ok(response) => {
                let available = response.status().is_success();
                debug!("AI service availability: {}", available);
                Ok(available)
            }
            Err(e) => Err(ApiError::ServiceUnavailable {
                details: e.to_string(),
            }),
        }
    }
}
