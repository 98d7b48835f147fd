use crate::error::AuthError;
use parking_lot::RwLock;
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::retry::{should_retry, RequestMeta};
use super::store::TokenStore;

/// The access/refresh credential pair for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Profile returned by the authentication service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Owns the credential lifecycle: login, transparent refresh, logout.
///
/// Exactly one live pair exists per session. The pair is mutated only by
/// login, refresh, and logout, and destroyed on logout or terminal refresh
/// failure. Every authorized request is intercepted for the
/// refresh-and-resubmit-once protocol.
pub struct CredentialManager {
    http: reqwest::Client,
    base_url: String,
    store: TokenStore,
    pair: RwLock<Option<CredentialPair>>,
}

impl CredentialManager {
    /// Create a manager, restoring any persisted pair
    pub fn new(base_url: String, store: TokenStore) -> Self {
        let pair = store.load();
        if pair.is_some() {
            info!("Restored persisted credentials");
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            store,
            pair: RwLock::new(pair),
        }
    }

    /// Synchronous authenticated check; never validates against the server
    pub fn is_authenticated(&self) -> bool {
        self.pair.read().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.pair.read().as_ref().map(|p| p.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.pair.read().as_ref().map(|p| p.refresh_token.clone())
    }

    /// Drop the pair from memory and durable storage
    pub fn clear(&self) {
        *self.pair.write() = None;
        self.store.clear();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticate and store a fresh credential pair
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({
                "username": username,
                "password": password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Rejected {
                reason: rejection_reason(response, "Login failed").await,
            });
        }

        let tokens: TokenResponse = response.json().await?;
        let pair = CredentialPair {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        };
        self.store.save(&pair)?;
        *self.pair.write() = Some(pair);
        info!("Login succeeded for {}", username);
        Ok(())
    }

    /// Register a new account
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.url("/auth/register"))
            .json(&serde_json::json!({
                "username": username,
                "email": email,
                "password": password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Rejected {
                reason: rejection_reason(response, "Registration failed").await,
            });
        }
        Ok(())
    }

    /// Invalidate the pair server-side (best effort) and clear local state
    /// unconditionally
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.refresh_token() {
            let result = self
                .http
                .post(self.url("/auth/logout"))
                .json(&serde_json::json!({ "refresh_token": refresh_token }))
                .send()
                .await;
            if let Err(e) = result {
                warn!("Server-side logout failed: {}", e);
            }
        }
        self.clear();
        info!("Logged out");
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Any failure here is terminal: the pair is cleared and the session is
    /// expired. Callers must not retry further.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let Some(refresh_token) = self.refresh_token() else {
            self.clear();
            return Err(AuthError::SessionExpired);
        };

        let result = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("Token refresh rejected with status {}", response.status());
                self.clear();
                return Err(AuthError::SessionExpired);
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.clear();
                return Err(AuthError::SessionExpired);
            }
        };

        let refreshed: RefreshResponse = match response.json().await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!("Token refresh returned an unreadable body: {}", e);
                self.clear();
                return Err(AuthError::SessionExpired);
            }
        };

        self.store.save_access_token(&refreshed.access_token)?;
        if let Some(pair) = self.pair.write().as_mut() {
            pair.access_token = refreshed.access_token;
        }
        debug!("Access token refreshed");
        Ok(())
    }

    /// Issue an authorized request, transparently refreshing the access
    /// token and resubmitting the request exactly once on an authorization
    /// failure. A second authorization failure on the resubmitted request
    /// terminates the session.
    pub async fn authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, AuthError> {
        let mut meta = RequestMeta::default();

        loop {
            let token = self.access_token().ok_or(AuthError::NoCredentials)?;
            let mut request = self
                .http
                .request(method.clone(), self.url(path))
                .bearer_auth(token);
            if let Some(ref body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            if !should_retry(response.status(), meta) {
                warn!("Authorization failed again after refresh, expiring session");
                self.clear();
                return Err(AuthError::SessionExpired);
            }

            debug!("Authorization failed for {}, refreshing once", path);
            meta.retried = true;
            self.refresh().await?;
        }
    }

    /// Fetch the profile for the authenticated user.
    ///
    /// Failures demote the authenticated status through the interception
    /// path (a terminal refresh failure clears the pair).
    pub async fn current_user(&self) -> Result<UserProfile, AuthError> {
        let response = self.authorized(Method::GET, "/auth/me", None).await?;
        if !response.status().is_success() {
            return Err(AuthError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Opportunistic token validation against the server
    pub async fn verify_token(&self) -> Result<(), AuthError> {
        let response = self.authorized(Method::GET, "/auth/verify", None).await?;
        if !response.status().is_success() {
            return Err(AuthError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Extract the server's failure detail, falling back to a generic reason
async fn rejection_reason(response: Response, fallback: &str) -> String {
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody { detail: Some(detail) }) => detail,
        _ => fallback.to_string(),
    }
}
