//! Typed failures surfaced to application code

use std::fmt;

/// Coarse category of a surfaced error, for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Cors,
    Network,
    Http,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Cors => "cors",
            ErrorKind::Network => "network",
            ErrorKind::Http => "http",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors from API calls.
///
/// `Auth`, `Cors` and `Network` are only surfaced after the built-in retry for
/// their category has also failed. `Http` and `Unknown` are surfaced on first
/// occurrence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credential rejected twice, or the credential provider failed. The session
    /// has been signed out by the time the caller sees this.
    #[error("authentication failed: {message}")]
    Auth { status: Option<u16>, message: String },

    #[error("cross-origin request denied: {0}")]
    Cors(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth { .. } => ErrorKind::Auth,
            Error::Cors(_) => ErrorKind::Cors,
            Error::Network(_) => ErrorKind::Network,
            Error::Http { .. } => ErrorKind::Http,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Decode(_) | Error::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// HTTP status of the response that caused the failure, if one was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Auth { status, .. } => *status,
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the opt-in bounded retry may try again after this error.
    ///
    /// Cancellation is the caller's decision and auth failures have already
    /// ended the session, so neither is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Cancelled | Error::Auth { .. })
    }
}

/// Result alias for API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_statuses() {
        let auth = Error::Auth {
            status: Some(401),
            message: "token rejected".into(),
        };
        assert_eq!(auth.kind(), ErrorKind::Auth);
        assert_eq!(auth.http_status(), Some(401));

        let http = Error::Http {
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(http.kind(), ErrorKind::Http);
        assert_eq!(http.http_status(), Some(404));

        assert_eq!(Error::Network("reset".into()).http_status(), None);
        assert_eq!(Error::Decode("eof".into()).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn display_messages() {
        assert_eq!(Error::Cancelled.to_string(), "request cancelled");
        assert_eq!(
            Error::Http {
                status: 500,
                body: "boom".into()
            }
            .to_string(),
            "HTTP 500: boom"
        );
        assert_eq!(ErrorKind::Cors.to_string(), "cors");
    }

    #[test]
    fn cancelled_and_auth_are_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(
            !Error::Auth {
                status: None,
                message: "provider down".into()
            }
            .is_retryable()
        );
        assert!(Error::Network("timeout".into()).is_retryable());
        assert!(
            Error::Http {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
    }
}
