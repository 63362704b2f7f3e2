//! Failure classification for API attempts
//!
//! Maps one failed attempt onto the category that decides recovery:
//! 401 responses are `Auth`, transport failures whose message looks like a
//! browser-style cross-origin denial are `Cors`, other transport failures are
//! `Network`, and anything else is `Unknown`.
//!
//! The CORS check is a heuristic over the error text. An expired credential
//! behind some gateways shows up as an opaque "network error" with no response,
//! and a forced refresh fixes it. A genuine connectivity failure that happens to
//! carry the same text will be misclassified and pays for one extra refresh.

use std::error::Error as StdError;
use std::fmt;

/// Transport-failure message patterns treated as a cross-origin denial.
const CORS_PATTERNS: &[&str] = &["cors", "cross-origin", "network error"];

/// One failed HTTP attempt, as seen before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// A response arrived with a non-success status.
    Status { status: u16, body: String },
    /// No response was received.
    Transport { message: String, timed_out: bool },
}

impl AttemptFailure {
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        AttemptFailure::Transport {
            message: error_chain(error),
            timed_out: error.is_timeout(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptFailure::Status { status, .. } => Some(*status),
            AttemptFailure::Transport { .. } => None,
        }
    }

    /// Human-readable description, used as the surfaced error's cause.
    pub fn message(&self) -> String {
        match self {
            AttemptFailure::Status { status, body } if body.is_empty() => format!("HTTP {status}"),
            AttemptFailure::Status { status, body } => format!("HTTP {status}: {body}"),
            AttemptFailure::Transport { message, timed_out: true } => {
                format!("timed out: {message}")
            }
            AttemptFailure::Transport { message, .. } => message.clone(),
        }
    }
}

/// reqwest nests the useful part (connection refused, DNS failure) in the
/// source chain; flatten it so patterns can match.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Recovery category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Network,
    Cors,
    Auth,
    Unknown,
}

impl ErrorClass {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::Cors => "cors",
            ErrorClass::Auth => "auth",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pluggable classification, so deployments with a reliable CORS signal can
/// replace the text heuristic.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, failure: &AttemptFailure) -> ErrorClass;
}

/// Default classifier: status codes first, then message patterns.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    cors_patterns: Vec<String>,
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::with_cors_patterns(CORS_PATTERNS.iter().copied())
    }
}

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the transport-failure patterns treated as CORS denials.
    /// Matching is case-insensitive.
    pub fn with_cors_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            cors_patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }

    fn looks_like_cors(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.cors_patterns.iter().any(|p| lower.contains(p.as_str()))
    }
}

impl ErrorClassifier for HeuristicClassifier {
    fn classify(&self, failure: &AttemptFailure) -> ErrorClass {
        match failure {
            AttemptFailure::Status { status: 401, .. } => ErrorClass::Auth,
            AttemptFailure::Status { .. } => ErrorClass::Unknown,
            // A timeout is never a denial, whatever the message says
            AttemptFailure::Transport {
                timed_out: true, ..
            } => ErrorClass::Network,
            AttemptFailure::Transport { message, .. } if self.looks_like_cors(message) => {
                ErrorClass::Cors
            }
            AttemptFailure::Transport { .. } => ErrorClass::Network,
        }
    }
}
