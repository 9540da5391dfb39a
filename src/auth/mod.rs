//! Authentication: credential storage, the OAuth wire flow, the
//! interactive loopback login, and project onboarding.

pub mod credentials;
pub mod flow;
pub mod oauth;
pub mod onboard;

pub use credentials::{Credential, CredentialCheck, CredentialStore};
pub use flow::LoginFlow;
pub use onboard::{GeminiUserTier, LoadCodeAssistResponse, LongrunningOperation};
