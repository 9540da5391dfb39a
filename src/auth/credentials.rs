//! Persisted OAuth credential and the file-backed store.
//!
//! Credentials live in a single JSON file. The file location is resolved
//! with the following precedence:
//!
//! 1. `GOOGLE_APPLICATION_CREDENTIALS` - used verbatim as the full path
//! 2. A configured credential directory, joined with `oauth_creds.json`
//! 3. `~/.gemini/oauth_creds.json`
//!
//! Writes are atomic (temp file + rename) and on Unix the file is created
//! with mode 0600 inside a 0700 directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::constants::{
    CREDENTIAL_FILENAME, CREDENTIAL_PATH_ENV_VAR, EXPIRY_SAFETY_MARGIN, GEMINI_DIR,
};
use crate::error::{Error, Result};

/// A persisted OAuth credential.
///
/// Mirrors the JSON shape written by Google's client libraries. Unknown
/// fields are preserved across load/save round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// The OAuth access token.
    pub access_token: String,

    /// The refresh token, when offline access was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Expiry time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,

    /// Token type, normally `Bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// OpenID Connect identity token, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Any fields we do not model, kept verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Credential {
    /// Create a credential from an access token, refresh token, and
    /// lifetime in seconds.
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expiry_date: Some(Utc::now().timestamp_millis() + expires_in * 1000),
            token_type: Some("Bearer".to_string()),
            scope: None,
            id_token: None,
            extra: HashMap::new(),
        }
    }

    /// Check whether the access token is expired (or about to be).
    ///
    /// A credential within [`EXPIRY_SAFETY_MARGIN`] of its expiry counts as
    /// expired. A credential without an expiry date is used as-is.
    pub fn is_expired(&self) -> bool {
        match self.expiry_date {
            Some(expiry) => {
                let margin = EXPIRY_SAFETY_MARGIN.as_millis() as i64;
                Utc::now().timestamp_millis() + margin >= expiry
            }
            None => false,
        }
    }
}

/// Outcome of checking a stored credential against the token endpoint.
#[derive(Debug)]
pub enum CredentialCheck {
    /// The credential is usable and still honored by Google.
    Valid,
    /// The credential is missing, expired beyond refresh, or revoked.
    Invalid,
    /// The check could not be completed (e.g. network failure).
    Error(Error),
}

impl CredentialCheck {
    /// True only for [`CredentialCheck::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, CredentialCheck::Valid)
    }
}

/// File-backed credential store.
///
/// The store resolves its path lazily on every operation, so environment
/// changes and [`CredentialStore::set_directory`] take effect immediately.
pub struct CredentialStore {
    directory: RwLock<Option<PathBuf>>,
}

impl CredentialStore {
    /// Create a store using the default path resolution.
    pub fn new() -> Self {
        Self {
            directory: RwLock::new(None),
        }
    }

    /// Create a store with a pre-configured credential directory.
    pub fn with_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            directory: RwLock::new(Some(dir.into())),
        }
    }

    /// Set (or replace) the configured credential directory.
    ///
    /// Takes effect on the next operation. The environment override still
    /// wins when set.
    pub async fn set_directory(&self, dir: impl Into<PathBuf>) {
        let mut directory = self.directory.write().await;
        *directory = Some(dir.into());
    }

    /// Resolve the credential file path.
    pub async fn resolve_path(&self) -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CREDENTIAL_PATH_ENV_VAR) {
            if !path.trim().is_empty() {
                return Ok(expand_tilde(&path));
            }
        }

        if let Some(dir) = self.directory.read().await.as_ref() {
            return Ok(dir.join(CREDENTIAL_FILENAME));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::config("Could not determine home directory"))?;
        Ok(home.join(GEMINI_DIR).join(CREDENTIAL_FILENAME))
    }

    /// Load the stored credential, if any.
    ///
    /// Missing files, unreadable files, and malformed JSON all yield `None`;
    /// loading never fails.
    pub async fn load(&self) -> Option<Credential> {
        let path = match self.resolve_path().await {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "Could not resolve credential path");
                return None;
            }
        };

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No credential file");
                return None;
            }
        };

        match serde_json::from_str::<Credential>(&contents) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed credential file");
                None
            }
        }
    }

    /// Persist a credential atomically.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let path = self.resolve_path().await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            set_permissions(parent, 0o700).await?;
        }

        let contents = serde_json::to_string_pretty(credential)?;

        // Write to a temp file in the same directory, then rename into place
        // so a crash mid-write cannot leave a truncated credential.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents.as_bytes()).await?;
        #[cfg(unix)]
        set_permissions(&tmp_path, 0o600).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(path = %path.display(), "Saved credential");
        Ok(())
    }

    /// Delete the stored credential. Succeeds when no file exists.
    pub async fn clear(&self) -> Result<()> {
        let path = self.resolve_path().await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Cleared credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_credential() -> Credential {
        Credential::new("access-123".to_string(), Some("refresh-456".to_string()), 3600)
    }

    #[tokio::test]
    async fn test_resolve_path_default_under_home() {
        let store = CredentialStore::new();
        let path = store.resolve_path().await.unwrap();

        assert!(path.ends_with(
            PathBuf::from(GEMINI_DIR).join(CREDENTIAL_FILENAME)
        ));
    }

    #[tokio::test]
    async fn test_resolve_path_configured_directory() {
        let store = CredentialStore::new();
        store.set_directory("/tmp/creds-test").await;

        let path = store.resolve_path().await.unwrap();
        assert_eq!(path, PathBuf::from("/tmp/creds-test").join(CREDENTIAL_FILENAME));
    }

    #[tokio::test]
    async fn test_set_directory_last_writer_wins() {
        let store = CredentialStore::with_directory("/tmp/first");
        store.set_directory("/tmp/second").await;

        let path = store.resolve_path().await.unwrap();
        assert_eq!(path, PathBuf::from("/tmp/second").join(CREDENTIAL_FILENAME));
    }

    #[tokio::test]
    async fn test_env_var_wins_over_configured_directory() {
        // Serialized via a unique temp value; restored before exiting.
        std::env::set_var(CREDENTIAL_PATH_ENV_VAR, "/tmp/creds.json");

        let store = CredentialStore::with_directory("/tmp/ignored");
        let path = store.resolve_path().await.unwrap();

        std::env::remove_var(CREDENTIAL_PATH_ENV_VAR);

        assert_eq!(path, PathBuf::from("/tmp/creds.json"));
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::with_directory(dir.path());

        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_load_malformed_json_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::with_directory(dir.path());

        tokio::fs::write(dir.path().join(CREDENTIAL_FILENAME), "{not json")
            .await
            .unwrap();

        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::with_directory(dir.path());

        store.save(&sample_credential()).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.access_token, "access-123");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-456"));
        assert!(loaded.expiry_date.is_some());
    }

    #[tokio::test]
    async fn test_save_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::with_directory(dir.path());

        let json = r#"{"access_token":"a","mystery_field":"kept"}"#;
        tokio::fs::write(dir.path().join(CREDENTIAL_FILENAME), json)
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        store.save(&loaded).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!(
            reloaded.extra.get("mystery_field"),
            Some(&serde_json::Value::String("kept".to_string()))
        );
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::with_directory(dir.path());

        store.save(&sample_credential()).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_none());

        // Second clear with nothing on disk still succeeds.
        store.clear().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_save_sets_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = CredentialStore::with_directory(dir.path());
        store.save(&sample_credential()).await.unwrap();

        let path = store.resolve_path().await.unwrap();
        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_is_expired_with_margin() {
        let mut credential = sample_credential();
        assert!(!credential.is_expired());

        // Inside the safety margin counts as expired.
        credential.expiry_date = Some(Utc::now().timestamp_millis() + 1000);
        assert!(credential.is_expired());

        credential.expiry_date = Some(Utc::now().timestamp_millis() - 1000);
        assert!(credential.is_expired());

        credential.expiry_date = None;
        assert!(!credential.is_expired());
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/somewhere/creds.json");
        assert!(!expanded.to_string_lossy().starts_with('~'));

        let absolute = expand_tilde("/etc/creds.json");
        assert_eq!(absolute, PathBuf::from("/etc/creds.json"));
    }
}
