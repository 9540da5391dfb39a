//! Error types for cloudcode-gate.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the Code Assist API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication-related errors.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// API errors returned by Code Assist.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Network/HTTP errors.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Api { status: 401, .. })
    }
}

/// Authentication-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No valid credentials are stored.
    #[error("Not authenticated - please complete the login flow")]
    NotAuthenticated,

    /// Access token has expired and cannot be refreshed.
    #[error("Token expired - please re-authenticate")]
    TokenExpired,

    /// Refresh token is invalid (revoked or corrupted).
    #[error("Invalid grant - refresh token is invalid")]
    InvalidGrant,

    /// OAuth state mismatch (potential CSRF).
    #[error("OAuth state mismatch - possible CSRF attack")]
    StateMismatch,

    /// The loopback listener gave up waiting for the callback.
    #[error("Login timed out waiting for the OAuth callback")]
    Timeout,

    /// The authorization server reported an error, or the callback
    /// was malformed.
    #[error("Authorization callback failed: {0}")]
    CallbackFailed(String),

    /// Project discovery or onboarding failed.
    #[error("Failed to discover project: {0}")]
    ProjectDiscovery(String),

    /// The account requires an explicit Cloud project.
    #[error(
        "This account requires setting the GOOGLE_CLOUD_PROJECT environment \
         variable to a project with the Gemini for Cloud API enabled"
    )]
    WorkspaceRequired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing required field");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing required field"
        );

        let err = Error::api(429, "rate limited");
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn test_auth_error() {
        let err = Error::Auth(AuthError::NotAuthenticated);
        assert!(err.is_auth_error());

        let err = Error::api(401, "unauthorized");
        assert!(err.is_auth_error());

        let err = Error::api(500, "boom");
        assert!(!err.is_auth_error());
    }

    #[test]
    fn test_workspace_error_mentions_env_var() {
        let err = AuthError::WorkspaceRequired;
        assert!(err.to_string().contains("GOOGLE_CLOUD_PROJECT"));
    }
}
