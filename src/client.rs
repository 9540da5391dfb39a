//! The Code Assist client.
//!
//! [`CodeAssistClient`] ties the pieces together: credential storage and
//! refresh, the interactive login flow, project onboarding (memoized per
//! client), and the generation calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use cloudcode_gate::CodeAssistClient;
//!
//! # async fn example() -> cloudcode_gate::Result<()> {
//! let client = CodeAssistClient::builder().build()?;
//!
//! if !client.is_authenticated().await {
//!     client.authenticate(Default::default()).await?;
//! }
//!
//! let project = client.get_project_id().await?;
//! println!("using project {project}");
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use futures::stream::Stream;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::auth::credentials::{CredentialCheck, CredentialStore};
use crate::auth::flow::LoginFlow;
use crate::auth::oauth::{fetch_token_info, refresh_credential};
use crate::auth::onboard::{self, OnboardSchedule};
use crate::constants::{
    OAuthConfig, AUTH_TIMEOUT, CODE_ASSIST_API_VERSION, CODE_ASSIST_ENDPOINT, CONNECT_TIMEOUT,
    DEFAULT_OAUTH_CONFIG, ENDPOINT_ENV_VAR, METHOD_GENERATE_CONTENT,
    METHOD_STREAM_GENERATE_CONTENT, PROJECT_ENV_VAR,
};
use crate::error::{AuthError, Error, Result};
use crate::models::chunk::ResponseChunk;
use crate::models::event::StreamEvent;
use crate::transport::{EventStream, SseStream};

/// Options for [`CodeAssistClient::authenticate`].
#[derive(Debug, Default)]
pub struct AuthenticateOptions {
    /// Run the login flow even when a valid credential is stored.
    pub force: bool,
    /// Do not try to launch a browser; only log the URL.
    pub skip_browser: bool,
    /// Set the credential directory before doing anything else.
    pub credential_directory: Option<PathBuf>,
}

/// Builder for [`CodeAssistClient`].
#[derive(Debug, Default)]
pub struct CodeAssistClientBuilder {
    oauth_config: Option<OAuthConfig>,
    base_url: Option<String>,
    credential_directory: Option<PathBuf>,
    project_id: Option<String>,
    onboard_poll_interval: Option<Duration>,
    onboard_max_attempts: Option<u32>,
}

impl CodeAssistClientBuilder {
    /// Use a non-default OAuth configuration.
    pub fn with_oauth_config(mut self, config: OAuthConfig) -> Self {
        self.oauth_config = Some(config);
        self
    }

    /// Override the Code Assist endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Store credentials under this directory.
    pub fn with_credential_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credential_directory = Some(dir.into());
        self
    }

    /// Use a fixed project id, skipping negotiation.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Override the onboarding poll interval.
    pub fn with_onboard_poll_interval(mut self, interval: Duration) -> Self {
        self.onboard_poll_interval = Some(interval);
        self
    }

    /// Override the onboarding poll budget.
    pub fn with_onboard_max_attempts(mut self, attempts: u32) -> Self {
        self.onboard_max_attempts = Some(attempts);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CodeAssistClient> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let base_url = self
            .base_url
            .or_else(|| std::env::var(ENDPOINT_ENV_VAR).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| CODE_ASSIST_ENDPOINT.to_string());

        let store = match self.credential_directory {
            Some(dir) => CredentialStore::with_directory(dir),
            None => CredentialStore::new(),
        };

        let mut schedule = OnboardSchedule::default();
        if let Some(interval) = self.onboard_poll_interval {
            schedule.poll_interval = interval;
        }
        if let Some(attempts) = self.onboard_max_attempts {
            schedule.max_attempts = attempts;
        }

        Ok(CodeAssistClient {
            http,
            config: self.oauth_config.unwrap_or(DEFAULT_OAUTH_CONFIG),
            base_url,
            store,
            configured_project: self.project_id,
            project_id: RwLock::new(None),
            schedule,
        })
    }
}

/// OAuth-backed client for the Code Assist API.
pub struct CodeAssistClient {
    http: reqwest::Client,
    config: OAuthConfig,
    base_url: String,
    store: CredentialStore,
    configured_project: Option<String>,
    /// Negotiated project id, memoized for the client's lifetime.
    project_id: RwLock<Option<String>>,
    schedule: OnboardSchedule,
}

impl CodeAssistClient {
    /// Start building a client.
    pub fn builder() -> CodeAssistClientBuilder {
        CodeAssistClientBuilder::default()
    }

    /// Get a bearer token, refreshing the stored credential if expired.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotAuthenticated`] when nothing is stored;
    /// [`AuthError::TokenExpired`] when expired with no refresh token;
    /// [`AuthError::InvalidGrant`] when the refresh token was revoked.
    #[instrument(skip(self))]
    pub async fn get_access_token(&self) -> Result<String> {
        let credential = self
            .store
            .load()
            .await
            .ok_or(Error::Auth(AuthError::NotAuthenticated))?;

        if credential.is_expired() {
            debug!("Access token expired, refreshing");
            let refreshed = refresh_credential(&self.http, &self.config, &credential).await?;
            self.store.save(&refreshed).await?;
            return Ok(refreshed.access_token);
        }

        Ok(credential.access_token)
    }

    /// Check the stored credential against Google.
    ///
    /// Refreshes first when expired, then confirms via the token-info
    /// endpoint that the token is still honored (not revoked).
    pub async fn validate(&self) -> CredentialCheck {
        let Some(credential) = self.store.load().await else {
            return CredentialCheck::Invalid;
        };

        let credential = if credential.is_expired() {
            if credential.refresh_token.is_none() {
                return CredentialCheck::Invalid;
            }
            match refresh_credential(&self.http, &self.config, &credential).await {
                Ok(refreshed) => {
                    if let Err(e) = self.store.save(&refreshed).await {
                        warn!(error = %e, "Could not persist refreshed credential");
                    }
                    refreshed
                }
                Err(Error::Auth(AuthError::InvalidGrant)) => return CredentialCheck::Invalid,
                Err(Error::Api { status, .. }) if (400..500).contains(&status) => {
                    return CredentialCheck::Invalid
                }
                Err(e) => return CredentialCheck::Error(e),
            }
        } else {
            credential
        };

        match fetch_token_info(&self.http, &self.config, &credential.access_token).await {
            Ok(()) => CredentialCheck::Valid,
            Err(Error::Api { status, .. }) if (400..500).contains(&status) => {
                CredentialCheck::Invalid
            }
            Err(e) => CredentialCheck::Error(e),
        }
    }

    /// True when a stored credential passes [`CodeAssistClient::validate`].
    pub async fn is_authenticated(&self) -> bool {
        self.validate().await.is_valid()
    }

    /// Run the interactive login flow.
    ///
    /// Skipped when a valid credential already exists, unless
    /// [`AuthenticateOptions::force`] is set. On success the project id is
    /// resolved eagerly so later calls hit the memo.
    #[instrument(skip(self, options))]
    pub async fn authenticate(&self, options: AuthenticateOptions) -> Result<()> {
        if let Some(dir) = options.credential_directory {
            self.store.set_directory(dir).await;
        }

        if !options.force && self.validate().await.is_valid() {
            info!("Already authenticated");
            return Ok(());
        }

        if options.force {
            self.store.clear().await?;
            self.clear_cache().await;
        }

        let flow = LoginFlow::bind(self.http.clone(), self.config.clone()).await?;
        if options.skip_browser {
            info!(url = %flow.authorization_url, "Visit this URL to authorize");
        } else {
            flow.open_browser();
        }

        let credential = flow.finish(AUTH_TIMEOUT).await?;
        self.store.save(&credential).await?;
        info!("Login complete");

        // Warm the project memo; a failure here is not a failed login.
        if let Err(e) = self.get_project_id().await {
            warn!(error = %e, "Project resolution after login failed");
        }

        Ok(())
    }

    /// Resolve the Cloud project to bill against.
    ///
    /// `GOOGLE_CLOUD_PROJECT` and a builder-configured project id bypass
    /// negotiation entirely. Otherwise the onboarding negotiation runs
    /// once and the result is memoized until [`CodeAssistClient::clear_cache`].
    #[instrument(skip(self))]
    pub async fn get_project_id(&self) -> Result<String> {
        if let Ok(project) = std::env::var(PROJECT_ENV_VAR) {
            if !project.trim().is_empty() {
                return Ok(project);
            }
        }

        if let Some(project) = &self.configured_project {
            return Ok(project.clone());
        }

        if let Some(project) = self.project_id.read().await.as_ref() {
            return Ok(project.clone());
        }

        let token = self.get_access_token().await?;

        // Hold the write lock across negotiation so concurrent callers
        // don't onboard twice.
        let mut memo = self.project_id.write().await;
        if let Some(project) = memo.as_ref() {
            return Ok(project.clone());
        }

        let project = onboard::resolve_project(
            &self.http,
            &self.base_url,
            &token,
            self.configured_project.as_deref(),
            self.schedule,
        )
        .await?;

        *memo = Some(project.clone());
        Ok(project)
    }

    /// Forget the memoized project id. Idempotent.
    pub async fn clear_cache(&self) {
        let mut memo = self.project_id.write().await;
        *memo = None;
    }

    /// Set the credential directory for subsequent operations.
    pub async fn set_credential_directory(&self, dir: impl Into<PathBuf>) {
        self.store.set_directory(dir).await;
    }

    /// Remove the stored credential and forget the project memo.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        self.store.clear().await?;
        self.clear_cache().await;
        info!("Logged out");
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, CODE_ASSIST_API_VERSION, method)
    }

    fn wrap_request(&self, model: &str, project: &str, request: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "model": model,
            "project": project,
            "request": request,
        })
    }

    /// Non-streaming generation call.
    #[instrument(skip(self, request))]
    pub async fn generate(&self, model: &str, request: serde_json::Value) -> Result<ResponseChunk> {
        let token = self.get_access_token().await?;
        let project = self.get_project_id().await?;

        let response = self
            .http
            .post(self.method_url(METHOD_GENERATE_CONTENT))
            .bearer_auth(token)
            .json(&self.wrap_request(model, &project, request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), body));
        }

        Ok(response.json().await?)
    }

    /// Streaming generation call, returning the decoded event stream.
    #[instrument(skip(self, request))]
    pub async fn stream_generate(
        &self,
        model: &str,
        request: serde_json::Value,
    ) -> Result<impl Stream<Item = StreamEvent> + Send + 'static> {
        let token = self.get_access_token().await?;
        let project = self.get_project_id().await?;

        let url = format!(
            "{}?alt=sse",
            self.method_url(METHOD_STREAM_GENERATE_CONTENT)
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&self.wrap_request(model, &project, request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), body));
        }

        Ok(EventStream::new(SseStream::new(response.bytes_stream())))
    }
}
