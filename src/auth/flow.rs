//! Interactive login flow over a loopback redirect.
//!
//! [`LoginFlow::bind`] grabs an ephemeral localhost port, builds the
//! authorization URL, and starts a one-shot HTTP listener for the OAuth
//! callback. [`LoginFlow::finish`] then waits for whichever happens first:
//! the callback resolving the flow (success or failure), or the timeout.
//! Every outcome shuts the listener down.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::auth::credentials::Credential;
use crate::auth::oauth::{build_authorization_url, exchange_code, generate_state};
use crate::constants::{OAuthConfig, CALLBACK_PATH};
use crate::error::{AuthError, Error, Result};

const ERROR_HTML: &str = "<html><body><h1>Login failed</h1>\
<p>Something went wrong while completing the login. Close this window \
and try again.</p></body></html>";

/// Query parameters Google sends to the OAuth redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code, present on success.
    #[serde(default)]
    pub code: Option<String>,
    /// Echoed CSRF state token.
    #[serde(default)]
    pub state: Option<String>,
    /// Error code, present when the user denied access or the request
    /// was malformed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Validate callback parameters against the expected state.
///
/// Checks, in order: a provider error, the CSRF state, and the presence
/// of the authorization code.
fn validate_params(params: &CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = &params.error {
        warn!(error = %error, "Authorization server returned an error");
        return Err(Error::Auth(AuthError::CallbackFailed(error.clone())));
    }

    match params.state.as_deref() {
        Some(state) if state == expected_state => {}
        Some(_) | None => {
            warn!("OAuth state missing or mismatched in callback");
            return Err(Error::Auth(AuthError::StateMismatch));
        }
    }

    params
        .code
        .clone()
        .ok_or_else(|| {
            Error::Auth(AuthError::CallbackFailed(
                "missing authorization code".to_string(),
            ))
        })
}

type FlowSender = oneshot::Sender<Result<Credential>>;

#[derive(Clone)]
struct CallbackContext {
    http: reqwest::Client,
    config: OAuthConfig,
    redirect_uri: String,
    expected_state: String,
    done: Arc<Mutex<Option<FlowSender>>>,
}

async fn handle_callback(
    State(ctx): State<CallbackContext>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = match validate_params(&params, &ctx.expected_state) {
        Ok(code) => {
            exchange_code(&ctx.http, &ctx.config, &code, &ctx.redirect_uri).await
        }
        Err(e) => Err(e),
    };

    let response = match &outcome {
        Ok(_) => Redirect::to(ctx.config.success_url).into_response(),
        // Callback-level rejections bounce the browser to the failure page;
        // an exchange blowing up mid-request is a plain server error.
        Err(Error::Auth(AuthError::CallbackFailed(_)))
        | Err(Error::Auth(AuthError::StateMismatch)) => {
            Redirect::to(ctx.config.failure_url).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to complete token exchange in callback");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_HTML)).into_response()
        }
    };

    // First resolution wins; late or duplicate callbacks only get the
    // HTTP response.
    if let Some(tx) = ctx.done.lock().await.take() {
        let _ = tx.send(outcome);
    }

    response
}

async fn handle_unknown() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// An in-progress interactive login.
///
/// Created by [`LoginFlow::bind`]; consumed by [`LoginFlow::finish`].
pub struct LoginFlow {
    /// URL the user must visit to authorize.
    pub authorization_url: String,
    /// CSRF state token embedded in the URL.
    pub state: String,
    /// Loopback port the listener is bound to.
    pub port: u16,
    done_rx: oneshot::Receiver<Result<Credential>>,
    shutdown_tx: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
}

impl LoginFlow {
    /// Bind the loopback listener and prepare the authorization URL.
    ///
    /// The listener binds port 0, so the OS assigns an ephemeral port and
    /// concurrent logins cannot collide on a fixed one.
    pub async fn bind(http: reqwest::Client, config: OAuthConfig) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();

        let redirect_uri = format!("http://localhost:{}{}", port, CALLBACK_PATH);
        let state = generate_state();
        let authorization_url = build_authorization_url(&config, &redirect_uri, &state);

        let (done_tx, done_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let ctx = CallbackContext {
            http,
            config,
            redirect_uri,
            expected_state: state.clone(),
            done: Arc::new(Mutex::new(Some(done_tx))),
        };

        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .fallback(handle_unknown)
            .with_state(ctx);

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .into_future();

        let server = tokio::spawn(async move {
            if let Err(e) = serve.await {
                warn!(error = %e, "OAuth callback listener failed");
            }
        });

        debug!(port, "OAuth callback listener bound");

        Ok(Self {
            authorization_url,
            state,
            port,
            done_rx,
            shutdown_tx,
            server,
        })
    }

    /// Open the authorization URL in the user's browser, best effort.
    ///
    /// The URL is also logged so it can be visited manually when no
    /// browser is available.
    pub fn open_browser(&self) {
        info!(url = %self.authorization_url, "Visit this URL to authorize");
        if let Err(e) = open::that(&self.authorization_url) {
            warn!(error = %e, "Could not launch a browser; open the URL manually");
        }
    }

    /// Wait for the flow to resolve, one way or another.
    ///
    /// Resolves exactly once: with the exchanged credential, with the
    /// callback's failure, or with [`AuthError::Timeout`] once `timeout`
    /// elapses. The listener is shut down in every case.
    pub async fn finish(self, timeout: Duration) -> Result<Credential> {
        let LoginFlow {
            done_rx,
            shutdown_tx,
            server,
            ..
        } = self;

        let outcome = tokio::select! {
            res = done_rx => match res {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Auth(AuthError::CallbackFailed(
                    "callback listener closed unexpectedly".to_string(),
                ))),
            },
            () = tokio::time::sleep(timeout) => {
                warn!("Timed out waiting for the OAuth callback");
                Err(Error::Auth(AuthError::Timeout))
            }
        };

        let _ = shutdown_tx.send(());
        let _ = server.await;

        outcome
    }
}
