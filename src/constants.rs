//! Constants and configuration for the Code Assist API.
//!
//! This module contains the OAuth client configuration, API endpoints,
//! credential file locations, and timing parameters used throughout
//! the library.

use std::time::Duration;

// ============================================================================
// API Endpoints
// ============================================================================

/// Production Code Assist API endpoint.
pub const CODE_ASSIST_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";

/// Environment variable overriding the Code Assist endpoint.
pub const ENDPOINT_ENV_VAR: &str = "CODE_ASSIST_ENDPOINT";

/// API version path segment.
///
/// Calls are `POST {endpoint}/{version}:{method}`.
pub const CODE_ASSIST_API_VERSION: &str = "v1internal";

/// Method name for project/tier discovery.
pub const METHOD_LOAD_CODE_ASSIST: &str = "loadCodeAssist";

/// Method name for user onboarding (long-running operation).
pub const METHOD_ONBOARD_USER: &str = "onboardUser";

/// Method name for non-streaming generation.
pub const METHOD_GENERATE_CONTENT: &str = "generateContent";

/// Method name for streaming generation (SSE).
pub const METHOD_STREAM_GENERATE_CONTENT: &str = "streamGenerateContent";

// ============================================================================
// OAuth Configuration
// ============================================================================

/// OAuth 2.0 configuration for Google authentication.
///
/// The default values use the Gemini CLI's OAuth credentials, which are
/// intentionally public (matching the desktop tooling).
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth client ID.
    pub client_id: &'static str,
    /// OAuth client secret.
    pub client_secret: &'static str,
    /// Authorization URL for initiating the OAuth flow.
    pub auth_url: &'static str,
    /// Token URL for code exchange and refresh.
    pub token_url: &'static str,
    /// Token info URL used to confirm a token is still honored.
    pub token_info_url: &'static str,
    /// OAuth scopes required for Code Assist access.
    pub scopes: &'static [&'static str],
    /// Page the user lands on after a successful login.
    pub success_url: &'static str,
    /// Page the user lands on after a failed login.
    pub failure_url: &'static str,
}

/// Default OAuth configuration for Google Code Assist.
pub const DEFAULT_OAUTH_CONFIG: OAuthConfig = OAuthConfig {
    client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
    client_secret: "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",
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    token_info_url: "https://oauth2.googleapis.com/tokeninfo",
    scopes: &[
        "https://www.googleapis.com/auth/cloud-platform",
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
    ],
    success_url: "https://developers.google.com/gemini-code-assist/auth_success_gemini",
    failure_url: "https://developers.google.com/gemini-code-assist/auth_failure_gemini",
};

/// Path component the loopback listener serves the OAuth redirect on.
pub const CALLBACK_PATH: &str = "/oauth2callback";

// ============================================================================
// Credential Storage
// ============================================================================

/// Directory under the user's home that holds credentials.
pub const GEMINI_DIR: &str = ".gemini";

/// File name of the persisted OAuth credential.
pub const CREDENTIAL_FILENAME: &str = "oauth_creds.json";

/// Environment variable naming the full credential file path.
///
/// When set (and non-empty), it wins over any configured directory.
pub const CREDENTIAL_PATH_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable naming the Cloud project to use, bypassing
/// tier negotiation and onboarding entirely.
pub const PROJECT_ENV_VAR: &str = "GOOGLE_CLOUD_PROJECT";

// ============================================================================
// Project and Onboarding Constants
// ============================================================================

/// Fallback project ID used when onboarding fails unexpectedly.
///
/// This is a shared project that may have limited quota.
pub const DEFAULT_PROJECT_ID: &str = "elegant-machine-vq6tl";

/// Pause between onboarding long-running-operation polls.
pub const ONBOARD_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum number of onboarding re-polls after the initial submission.
pub const ONBOARD_MAX_ATTEMPTS: u32 = 12;

// ============================================================================
// Timeouts
// ============================================================================

/// How long the loopback listener waits for the OAuth callback.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection timeout for HTTP requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Safety margin applied when checking credential expiry.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(30);

// ============================================================================
// Client Metadata
// ============================================================================

/// IDE type reported in client metadata.
pub const IDE_TYPE: &str = "IDE_UNSPECIFIED";

/// Plugin type reported in client metadata.
pub const PLUGIN_TYPE: &str = "GEMINI";

/// Detect the platform string reported in client metadata.
///
/// # Examples
///
/// ```
/// use cloudcode_gate::constants::detect_platform;
///
/// let platform = detect_platform();
/// assert!(!platform.is_empty());
/// ```
pub fn detect_platform() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", "x86_64") => "DARWIN_AMD64",
        ("macos", "aarch64") => "DARWIN_ARM64",
        ("linux", "x86_64") => "LINUX_AMD64",
        ("linux", "aarch64") => "LINUX_ARM64",
        ("windows", "x86_64") => "WINDOWS_AMD64",
        _ => "PLATFORM_UNSPECIFIED",
    }
}
