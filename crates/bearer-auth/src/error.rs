//! Error types for token endpoint operations

use provider::ProviderError;

/// Errors from OAuth token endpoint calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for ProviderError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidCredentials(msg) => ProviderError::Auth(msg),
            Error::Http(msg) | Error::TokenExchange(msg) => ProviderError::Unavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credentials_maps_to_auth() {
        let err: ProviderError = Error::InvalidCredentials("invalid_grant".into()).into();
        assert_eq!(err, ProviderError::Auth("invalid_grant".into()));
    }

    #[test]
    fn transport_failures_map_to_unavailable() {
        let http: ProviderError = Error::Http("connection refused".into()).into();
        let exchange: ProviderError = Error::TokenExchange("502".into()).into();
        assert!(matches!(http, ProviderError::Unavailable(_)));
        assert!(matches!(exchange, ProviderError::Unavailable(_)));
    }
}
