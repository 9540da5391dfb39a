//! Tier negotiation and user onboarding.
//!
//! Resolving a Code Assist project works in two steps:
//!
//! 1. `loadCodeAssist` reports the caller's current tier (if already
//!    onboarded) and the tiers they are allowed to onboard into.
//! 2. `onboardUser` starts a long-running operation that provisions a
//!    managed project; it is re-submitted until the operation reports
//!    `done` or the poll budget runs out.
//!
//! Accounts on tiers that require a user-defined project (Google
//! Workspace) cannot be onboarded automatically and are surfaced as
//! [`AuthError::WorkspaceRequired`]. Any other unexpected failure
//! degrades to the shared fallback project.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::constants::{
    detect_platform, CODE_ASSIST_API_VERSION, DEFAULT_PROJECT_ID, IDE_TYPE,
    METHOD_LOAD_CODE_ASSIST, METHOD_ONBOARD_USER, ONBOARD_MAX_ATTEMPTS, ONBOARD_POLL_INTERVAL,
    PLUGIN_TYPE,
};
use crate::error::{AuthError, Error, Result};

/// Client identification sent with negotiation calls.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    ide_type: &'static str,
    platform: &'static str,
    plugin_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duet_project: Option<String>,
}

impl ClientMetadata {
    /// Build metadata for the current host, naming `project` when known.
    pub fn detect(project: Option<&str>) -> Self {
        Self {
            ide_type: IDE_TYPE,
            platform: detect_platform(),
            plugin_type: PLUGIN_TYPE,
            duet_project: project.map(String::from),
        }
    }
}

/// A tier the account holds or may onboard into.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUserTier {
    /// Tier identifier, e.g. `free-tier`.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether this is the tier new users should land on.
    #[serde(default)]
    pub is_default: Option<bool>,
    /// Whether onboarding into this tier requires the caller to bring
    /// their own Cloud project.
    #[serde(default)]
    pub user_defined_cloudaicompanion_project: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadCodeAssistRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    cloudaicompanion_project: Option<String>,
    metadata: ClientMetadata,
}

/// Response from `loadCodeAssist`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadCodeAssistResponse {
    /// The tier the account is already on, when onboarded.
    #[serde(default)]
    pub current_tier: Option<GeminiUserTier>,
    /// Tiers available for onboarding.
    #[serde(default)]
    pub allowed_tiers: Option<Vec<GeminiUserTier>>,
    /// The managed project, when one already exists.
    #[serde(default)]
    pub cloudaicompanion_project: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OnboardUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    tier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloudaicompanion_project: Option<String>,
    metadata: ClientMetadata,
}

/// A long-running onboarding operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongrunningOperation {
    /// Server-assigned operation name.
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the operation has finished.
    #[serde(default)]
    pub done: bool,
    /// Payload, present when done and successful.
    #[serde(default)]
    pub response: Option<OnboardPayload>,
    /// Failure details, present when done and failed.
    #[serde(default)]
    pub error: Option<OperationError>,
}

/// Successful onboarding payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardPayload {
    /// The provisioned companion project.
    #[serde(default)]
    pub cloudaicompanion_project: Option<ProjectRef>,
}

/// Reference to a companion project.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    /// Project identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Failure details of a long-running operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    /// Numeric status code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Failure message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Polling knobs for the onboarding loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OnboardSchedule {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for OnboardSchedule {
    fn default() -> Self {
        Self {
            poll_interval: ONBOARD_POLL_INTERVAL,
            max_attempts: ONBOARD_MAX_ATTEMPTS,
        }
    }
}

/// Pick the tier to onboard into: the default tier if one is flagged,
/// otherwise the first allowed tier.
fn select_tier(tiers: &[GeminiUserTier]) -> Option<&GeminiUserTier> {
    tiers
        .iter()
        .find(|t| t.is_default == Some(true))
        .or_else(|| tiers.first())
}

fn is_workspace_error(message: &str) -> bool {
    message.to_lowercase().contains("workspace")
}

async fn call_method<B: Serialize, T: DeserializeOwned>(
    http: &reqwest::Client,
    base_url: &str,
    token: &str,
    method: &str,
    body: &B,
) -> Result<T> {
    let url = format!("{}/{}:{}", base_url, CODE_ASSIST_API_VERSION, method);

    let response = http
        .post(&url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::api(status.as_u16(), body));
    }

    Ok(response.json().await?)
}

/// Run tier negotiation and onboarding, returning the project id.
#[instrument(skip(http, token, schedule))]
async fn negotiate(
    http: &reqwest::Client,
    base_url: &str,
    token: &str,
    initial_project: Option<&str>,
    schedule: OnboardSchedule,
) -> Result<String> {
    let metadata = ClientMetadata::detect(initial_project);

    let load: LoadCodeAssistResponse = call_method(
        http,
        base_url,
        token,
        METHOD_LOAD_CODE_ASSIST,
        &LoadCodeAssistRequest {
            cloudaicompanion_project: initial_project.map(String::from),
            metadata,
        },
    )
    .await?;

    // Already onboarded: the server names the project (or we keep the
    // one we asked about).
    if load.current_tier.is_some() {
        return load
            .cloudaicompanion_project
            .or_else(|| initial_project.map(String::from))
            .ok_or_else(|| {
                Error::Auth(AuthError::ProjectDiscovery(
                    "account is onboarded but no project was reported".to_string(),
                ))
            });
    }

    // The project the server already associates with the account wins
    // over the caller's candidate for the onboarding submission.
    let candidate_project = load
        .cloudaicompanion_project
        .or_else(|| initial_project.map(String::from));

    let allowed = load.allowed_tiers.unwrap_or_default();
    let tier = select_tier(&allowed).ok_or_else(|| {
        Error::Auth(AuthError::ProjectDiscovery(
            "no allowed tiers returned by loadCodeAssist".to_string(),
        ))
    })?;

    if tier.user_defined_cloudaicompanion_project == Some(true) && candidate_project.is_none() {
        return Err(Error::Auth(AuthError::WorkspaceRequired));
    }

    debug!(tier = %tier.id, "Onboarding into tier");

    let request = OnboardUserRequest {
        tier_id: Some(tier.id.clone()),
        cloudaicompanion_project: candidate_project.clone(),
        metadata: ClientMetadata::detect(candidate_project.as_deref()),
    };

    let mut operation: LongrunningOperation =
        call_method(http, base_url, token, METHOD_ONBOARD_USER, &request).await?;

    let mut attempts = 0;
    while !operation.done && attempts < schedule.max_attempts {
        tokio::time::sleep(schedule.poll_interval).await;
        operation = call_method(http, base_url, token, METHOD_ONBOARD_USER, &request).await?;
        attempts += 1;
    }

    if !operation.done {
        return Err(Error::Auth(AuthError::ProjectDiscovery(format!(
            "onboarding did not complete after {} polls",
            attempts
        ))));
    }

    if let Some(error) = operation.error {
        let message = error.message.unwrap_or_default();
        if is_workspace_error(&message) {
            return Err(Error::Auth(AuthError::WorkspaceRequired));
        }
        return Err(Error::Auth(AuthError::ProjectDiscovery(format!(
            "onboarding failed ({}): {}",
            error.code.unwrap_or(-1),
            message
        ))));
    }

    operation
        .response
        .and_then(|payload| payload.cloudaicompanion_project)
        .map(|project| project.id)
        .ok_or_else(|| {
            Error::Auth(AuthError::ProjectDiscovery(
                "onboarding completed without a project id".to_string(),
            ))
        })
}

/// Resolve the project id, degrading to the shared fallback project on
/// unexpected failure.
///
/// Accounts that must bring their own project ([`AuthError::WorkspaceRequired`])
/// never degrade; the caller has to act on that error.
pub(crate) async fn resolve_project(
    http: &reqwest::Client,
    base_url: &str,
    token: &str,
    initial_project: Option<&str>,
    schedule: OnboardSchedule,
) -> Result<String> {
    match negotiate(http, base_url, token, initial_project, schedule).await {
        Ok(project) => {
            info!(project_id = %project, "Resolved Code Assist project");
            Ok(project)
        }
        Err(e @ Error::Auth(AuthError::WorkspaceRequired)) => Err(e),
        // Any failure mentioning Workspace means the account needs its own
        // project; that must reach the caller, not the fallback.
        Err(e) if is_workspace_error(&e.to_string()) => {
            warn!(error = %e, "Workspace account detected during negotiation");
            Err(Error::Auth(AuthError::WorkspaceRequired))
        }
        Err(e) => {
            warn!(error = %e, "Project negotiation failed, using fallback project");
            Ok(DEFAULT_PROJECT_ID.to_string())
        }
    }
}
