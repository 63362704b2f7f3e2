//! External collaborators of the request orchestrator
//!
//! Defines the seams the orchestrator consumes but does not own:
//! - `CredentialProvider` issues and refreshes bearer tokens
//! - `LoadingSink` receives debounced start/stop loading notifications
//! - `SessionHook` is told when an unrecoverable auth failure requires sign-out
//!
//! `FixedTokenProvider` is the trivial credential provider (one static token).
//! Token-endpoint backed providers live in `bearer-auth`.

pub mod credential;
pub mod fixed;

pub use credential::Credential;
pub use fixed::FixedTokenProvider;

use std::future::Future;
use std::pin::Pin;

/// Errors from credential provider operations.
///
/// `Clone` so a single failed refresh can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The identity is no longer valid (revoked refresh token, signed out).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The provider could not be reached or answered with a transient failure.
    #[error("credential provider unavailable: {0}")]
    Unavailable(String),

    #[error("internal provider error: {0}")]
    Internal(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Source of bearer credentials.
///
/// `force_refresh` asks the provider to bypass any cache of its own and mint a
/// new token (used after the API rejected the current one).
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialProvider>`).
pub trait CredentialProvider: Send + Sync {
    /// Identifier for logging (e.g. "fixed", "refresh-token")
    fn id(&self) -> &str;

    fn fetch_token(
        &self,
        force_refresh: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Credential>> + Send + '_>>;
}

/// Receiver of loading-indicator transitions.
pub trait LoadingSink: Send + Sync {
    fn set_loading(&self, loading: bool);
}

impl<F> LoadingSink for F
where
    F: Fn(bool) + Send + Sync,
{
    fn set_loading(&self, loading: bool) {
        self(loading)
    }
}

/// Notified when the session must end (credential unrecoverable).
pub trait SessionHook: Send + Sync {
    fn sign_out(&self, reason: &str);
}

impl<F> SessionHook for F
where
    F: Fn(&str) + Send + Sync,
{
    fn sign_out(&self, reason: &str) {
        self(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn provider_error_messages() {
        assert_eq!(
            ProviderError::Auth("refresh token revoked".into()).to_string(),
            "authentication failed: refresh token revoked"
        );
        assert!(
            ProviderError::Unavailable("connection refused".into())
                .to_string()
                .contains("connection refused")
        );
    }

    #[test]
    fn closures_act_as_loading_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |loading: bool| seen.lock().unwrap().push(loading);
        sink.set_loading(true);
        sink.set_loading(false);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn closures_act_as_session_hook() {
        let reasons = Mutex::new(Vec::<String>::new());
        let hook = |reason: &str| reasons.lock().unwrap().push(reason.to_string());
        hook.sign_out("token rejected twice");
        assert_eq!(reasons.lock().unwrap().as_slice(), ["token rejected twice"]);
    }
}
