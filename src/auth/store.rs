use crate::error::AuthError;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::manager::CredentialPair;

const ACCESS_TOKEN_FILE: &str = "access_token";
const REFRESH_TOKEN_FILE: &str = "refresh_token";

/// Durable storage for the credential pair.
///
/// Each token lives under its own key (one file per token) so the pair
/// survives process restarts and an access-token refresh rewrites only the
/// access key.
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Resolve the store location: an explicit directory when configured,
    /// the platform data directory otherwise.
    pub fn resolve(state_dir: Option<&str>) -> Self {
        let dir = match state_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("visionlink"),
        };
        Self::new(dir)
    }

    /// Load the persisted pair, if both tokens are present
    pub fn load(&self) -> Option<CredentialPair> {
        let access_token = fs::read_to_string(self.dir.join(ACCESS_TOKEN_FILE)).ok()?;
        let refresh_token = fs::read_to_string(self.dir.join(REFRESH_TOKEN_FILE)).ok()?;
        debug!("Loaded persisted credentials from {}", self.dir.display());
        Some(CredentialPair {
            access_token,
            refresh_token,
        })
    }

    /// Persist a full pair
    pub fn save(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(ACCESS_TOKEN_FILE), &pair.access_token)?;
        fs::write(self.dir.join(REFRESH_TOKEN_FILE), &pair.refresh_token)?;
        Ok(())
    }

    /// Rewrite only the access token after a refresh
    pub fn save_access_token(&self, access_token: &str) -> Result<(), AuthError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(ACCESS_TOKEN_FILE), access_token)?;
        Ok(())
    }

    /// Remove both tokens; missing files are not an error
    pub fn clear(&self) {
        for name in [ACCESS_TOKEN_FILE, REFRESH_TOKEN_FILE] {
            let path = self.dir.join(name);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pair() -> CredentialPair {
        CredentialPair {
            access_token: "access-abc".to_string(),
            refresh_token: "refresh-xyz".to_string(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf());

        assert!(store.load().is_none());
        store.save(&pair()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, pair());
    }

    #[test]
    fn test_refresh_rewrites_only_access_token() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf());

        store.save(&pair()).unwrap();
        store.save_access_token("access-new").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "access-new");
        assert_eq!(loaded.refresh_token, "refresh-xyz");
    }

    #[test]
    fn test_clear_removes_both_tokens() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf());

        store.save(&pair()).unwrap();
        store.clear();
        assert!(store.load().is_none());

        // Clearing an already-empty store must not panic
        store.clear();
    }

    #[test]
    fn test_partial_pair_does_not_load() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf());

        store.save_access_token("orphan").unwrap();
        assert!(store.load().is_none());
    }
}
