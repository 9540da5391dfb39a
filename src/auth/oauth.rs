//! OAuth 2.0 wire helpers.
//!
//! This module provides the low-level pieces of the authorization-code
//! flow used by Code Assist:
//!
//! - CSRF state generation
//! - Authorization URL building
//! - Code exchange and token refresh
//! - Token-info lookups
//!
//! The flow uses a confidential client (id + secret) with a loopback
//! redirect; there is no PKCE leg.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::auth::credentials::Credential;
use crate::constants::OAuthConfig;
use crate::error::{AuthError, Error, Result};

/// Generate a random state parameter for CSRF protection.
///
/// The state is a 32-byte random value encoded as base64url (no padding),
/// resulting in 43 characters. It is embedded in the authorization URL and
/// validated when the callback is received.
///
/// # Example
///
/// ```
/// use cloudcode_gate::auth::oauth::generate_state;
///
/// let state1 = generate_state();
/// let state2 = generate_state();
///
/// assert_ne!(state1, state2);
/// assert_eq!(state1.len(), 43);
/// ```
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the Google OAuth authorization URL.
///
/// `access_type=offline` and `prompt=consent` are requested so that the
/// token exchange yields a refresh token.
///
/// # Example
///
/// ```
/// use cloudcode_gate::auth::oauth::{build_authorization_url, generate_state};
/// use cloudcode_gate::constants::DEFAULT_OAUTH_CONFIG;
///
/// let state = generate_state();
/// let url = build_authorization_url(
///     &DEFAULT_OAUTH_CONFIG,
///     "http://localhost:7777/oauth2callback",
///     &state,
/// );
///
/// assert!(url.starts_with("https://accounts.google.com/"));
/// assert!(url.contains("access_type=offline"));
/// assert!(url.contains("prompt=consent"));
/// ```
pub fn build_authorization_url(config: &OAuthConfig, redirect_uri: &str, state: &str) -> String {
    let scopes = config.scopes.join(" ");

    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
        config.auth_url,
        urlencoding::encode(config.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes),
        urlencoding::encode(state),
    )
}

/// Response from the Google token endpoint.
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Error response from the Google token endpoint.
#[derive(Debug, serde::Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn token_endpoint_error(status: u16, body: &str) -> Error {
    if let Ok(error) = serde_json::from_str::<TokenErrorResponse>(body) {
        warn!(
            error = %error.error,
            description = ?error.error_description,
            "Token endpoint returned an error"
        );

        if error.error == "invalid_grant" {
            return Error::Auth(AuthError::InvalidGrant);
        }

        return Error::api(
            status,
            error.error_description.unwrap_or(error.error),
        );
    }

    Error::api(status, body)
}

/// Exchange an authorization code for a credential.
///
/// # Errors
///
/// Returns an error if the token endpoint rejects the code, the network
/// request fails, or the response cannot be parsed.
#[instrument(skip(http, config, code), fields(token_url = config.token_url))]
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<Credential> {
    debug!("Exchanging authorization code for tokens");

    let response = http
        .post(config.token_url)
        .form(&[
            ("client_id", config.client_id),
            ("client_secret", config.client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(token_endpoint_error(status.as_u16(), &body));
    }

    let token: TokenResponse = serde_json::from_str(&body)?;

    debug!("Token exchange successful");

    let mut credential = Credential::new(
        token.access_token,
        token.refresh_token,
        token.expires_in,
    );
    credential.scope = token.scope;
    credential.id_token = token.id_token;
    Ok(credential)
}

/// Refresh an expired credential.
///
/// Google may not return a new refresh token on refresh requests; the
/// existing one is preserved in that case.
///
/// # Errors
///
/// Returns [`AuthError::TokenExpired`] if the credential has no refresh
/// token, and [`AuthError::InvalidGrant`] if the refresh token has been
/// revoked.
#[instrument(skip(http, config, credential), fields(token_url = config.token_url))]
pub async fn refresh_credential(
    http: &reqwest::Client,
    config: &OAuthConfig,
    credential: &Credential,
) -> Result<Credential> {
    let refresh_token = credential
        .refresh_token
        .as_deref()
        .ok_or(Error::Auth(AuthError::TokenExpired))?;

    debug!("Refreshing access token");

    let response = http
        .post(config.token_url)
        .form(&[
            ("client_id", config.client_id),
            ("client_secret", config.client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(token_endpoint_error(status.as_u16(), &body));
    }

    let token: TokenResponse = serde_json::from_str(&body)?;

    debug!("Token refresh successful");

    let mut refreshed = credential.clone();
    refreshed.access_token = token.access_token;
    refreshed.expiry_date =
        Some(chrono::Utc::now().timestamp_millis() + token.expires_in * 1000);
    if let Some(new_refresh) = token.refresh_token {
        refreshed.refresh_token = Some(new_refresh);
    }
    Ok(refreshed)
}

/// Ask Google whether an access token is still honored.
///
/// A 2xx answer means the token is live. A 4xx answer means it has been
/// revoked or never existed. Anything else is a transport-level failure.
#[instrument(skip(http, config, access_token))]
pub async fn fetch_token_info(
    http: &reqwest::Client,
    config: &OAuthConfig,
    access_token: &str,
) -> Result<()> {
    let response = http
        .get(config.token_info_url)
        .query(&[("access_token", access_token)])
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::api(status.as_u16(), body))
}
