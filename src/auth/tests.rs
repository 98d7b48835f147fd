use super::*;
use crate::error::AuthError;
use parking_lot::Mutex;
use reqwest::Method;
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct ScriptedResponse {
    status: u16,
    body: &'static str,
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Minimal scripted HTTP server: serves one queued response per connection
/// and records the request head it saw (lowercased).
async fn spawn_server(responses: Vec<ScriptedResponse>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

    let seen_task = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let seen = Arc::clone(&seen_task);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(header_end) = find_subslice(&buf, b"\r\n\r\n") {
                        let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                        let content_length = head
                            .lines()
                            .find_map(|line| line.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() >= header_end + 4 + content_length {
                            seen.lock().push(head);
                            break;
                        }
                    }
                }

                let response = queue
                    .lock()
                    .pop_front()
                    .unwrap_or(ScriptedResponse {
                        status: 500,
                        body: "",
                    });
                let payload = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    response.status,
                    response.body.len(),
                    response.body
                );
                let _ = socket.write_all(payload.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), seen)
}

fn seeded_manager(base_url: String, dir: &TempDir) -> CredentialManager {
    let store = TokenStore::new(dir.path().to_path_buf());
    store
        .save(&CredentialPair {
            access_token: "a0".to_string(),
            refresh_token: "r0".to_string(),
        })
        .unwrap();
    CredentialManager::new(base_url, store)
}

const PROFILE: &str = r#"{"id":1,"username":"alice","email":"alice@example.com","is_active":true}"#;

#[tokio::test]
async fn test_restores_persisted_pair() {
    let dir = TempDir::new().unwrap();
    let manager = seeded_manager("http://127.0.0.1:1".to_string(), &dir);
    assert!(manager.is_authenticated());
    assert_eq!(manager.access_token().as_deref(), Some("a0"));
}

#[tokio::test]
async fn test_authorized_without_credentials() {
    let dir = TempDir::new().unwrap();
    let store = TokenStore::new(dir.path().to_path_buf());
    let manager = CredentialManager::new("http://127.0.0.1:1".to_string(), store);

    assert!(!manager.is_authenticated());
    let result = manager.authorized(Method::GET, "/auth/me", None).await;
    assert!(matches!(result, Err(AuthError::NoCredentials)));
}

#[tokio::test]
async fn test_login_stores_pair() {
    let (base_url, seen) = spawn_server(vec![ScriptedResponse {
        status: 200,
        body: r#"{"access_token":"a1","refresh_token":"r1","token_type":"bearer","expires_in":3600}"#,
    }])
    .await;

    let dir = TempDir::new().unwrap();
    let store = TokenStore::new(dir.path().to_path_buf());
    let manager = CredentialManager::new(base_url, store);

    manager.login("alice", "hunter2").await.unwrap();
    assert!(manager.is_authenticated());
    assert_eq!(manager.access_token().as_deref(), Some("a1"));

    // Pair survives a fresh manager over the same store
    let reloaded = CredentialManager::new(
        "http://127.0.0.1:1".to_string(),
        TokenStore::new(dir.path().to_path_buf()),
    );
    assert!(reloaded.is_authenticated());

    let seen = seen.lock();
    assert!(seen[0].starts_with("post /auth/login"));
}

#[tokio::test]
async fn test_login_rejection_reason() {
    let (base_url, _seen) = spawn_server(vec![ScriptedResponse {
        status: 401,
        body: r#"{"detail":"Incorrect username or password"}"#,
    }])
    .await;

    let dir = TempDir::new().unwrap();
    let manager = CredentialManager::new(base_url, TokenStore::new(dir.path().to_path_buf()));

    match manager.login("alice", "wrong").await {
        Err(AuthError::Rejected { reason }) => {
            assert_eq!(reason, "Incorrect username or password");
        }
        other => panic!("Unexpected login result: {:?}", other.err()),
    }
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_unauthorized_request_is_retried_exactly_once() {
    let (base_url, seen) = spawn_server(vec![
        ScriptedResponse {
            status: 401,
            body: "{}",
        },
        ScriptedResponse {
            status: 200,
            body: r#"{"access_token":"a1"}"#,
        },
        ScriptedResponse {
            status: 200,
            body: PROFILE,
        },
    ])
    .await;

    let dir = TempDir::new().unwrap();
    let manager = seeded_manager(base_url, &dir);

    let profile = manager.current_user().await.unwrap();
    assert_eq!(profile.username, "alice");

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].starts_with("get /auth/me"));
    assert!(seen[0].contains("authorization: bearer a0"));
    assert!(seen[1].starts_with("post /auth/refresh"));
    // The resubmitted request carries the refreshed token
    assert!(seen[2].starts_with("get /auth/me"));
    assert!(seen[2].contains("authorization: bearer a1"));

    // The refreshed access token was persisted alongside the old refresh token
    let reloaded = TokenStore::new(dir.path().to_path_buf()).load().unwrap();
    assert_eq!(reloaded.access_token, "a1");
    assert_eq!(reloaded.refresh_token, "r0");
}

#[tokio::test]
async fn test_second_authorization_failure_expires_session() {
    let (base_url, seen) = spawn_server(vec![
        ScriptedResponse {
            status: 401,
            body: "{}",
        },
        ScriptedResponse {
            status: 200,
            body: r#"{"access_token":"a1"}"#,
        },
        ScriptedResponse {
            status: 401,
            body: "{}",
        },
    ])
    .await;

    let dir = TempDir::new().unwrap();
    let manager = seeded_manager(base_url, &dir);

    let result = manager.current_user().await;
    assert!(matches!(result, Err(AuthError::SessionExpired)));
    assert!(!manager.is_authenticated());
    assert!(TokenStore::new(dir.path().to_path_buf()).load().is_none());

    // No infinite loop: exactly one resubmission happened
    assert_eq!(seen.lock().len(), 3);
}

#[tokio::test]
async fn test_refresh_failure_expires_session() {
    let (base_url, seen) = spawn_server(vec![
        ScriptedResponse {
            status: 401,
            body: "{}",
        },
        ScriptedResponse {
            status: 401,
            body: r#"{"detail":"refresh token revoked"}"#,
        },
    ])
    .await;

    let dir = TempDir::new().unwrap();
    let manager = seeded_manager(base_url, &dir);

    let result = manager.current_user().await;
    assert!(matches!(result, Err(AuthError::SessionExpired)));
    assert!(!manager.is_authenticated());
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test]
async fn test_logout_clears_locally_even_when_server_unreachable() {
    let dir = TempDir::new().unwrap();
    // Nothing listens on this address; the server-side call fails
    let manager = seeded_manager("http://127.0.0.1:1".to_string(), &dir);

    manager.logout().await;
    assert!(!manager.is_authenticated());
    assert!(TokenStore::new(dir.path().to_path_buf()).load().is_none());
}
