//! OAuth-gated client for Google's Code Assist API.
//!
//! `cloudcode-gate` handles the full lifecycle of talking to the Code
//! Assist backend with personal Google credentials:
//!
//! - **Credential storage** ([`CredentialStore`]): OAuth tokens persisted
//!   as JSON, resolved from `GOOGLE_APPLICATION_CREDENTIALS`, a configured
//!   directory, or `~/.gemini/oauth_creds.json`.
//! - **Interactive login** ([`LoginFlow`]): a loopback HTTP listener on an
//!   ephemeral port catches the authorization callback, validates the CSRF
//!   state, and exchanges the code for tokens.
//! - **Onboarding** (behind [`CodeAssistClient::get_project_id`]): tier
//!   discovery and the long-running onboard operation that yields the
//!   Cloud project to bill against, memoized per client.
//! - **Streaming decode** ([`EventStream`], [`SseStream`]): SSE-framed
//!   generation responses decoded into text deltas, tool-call pairs, and
//!   a single trailing finish event.
//!
//! [`CodeAssistClient`] is the front door; the submodules are public for
//! callers that need the pieces individually.

pub mod auth;
pub mod client;
pub mod constants;
pub mod error;
pub mod models;
pub mod transport;

pub use auth::{Credential, CredentialCheck, CredentialStore, LoginFlow};
pub use client::{AuthenticateOptions, CodeAssistClient, CodeAssistClientBuilder};
pub use error::{AuthError, Error, Result};
pub use models::{FinishReason, ResponseChunk, StreamEvent, Usage};
pub use transport::{EventStream, SseStream};
