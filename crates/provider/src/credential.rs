//! Bearer credential value type

use std::time::Duration;

use common::Secret;
use tokio::time::Instant;

/// A bearer token together with when it was fetched and how long it may be
/// used.
///
/// Credentials are replaced wholesale on refresh, never mutated in place.
/// `fetched_at` uses the tokio clock so paused-time tests can age credentials.
#[derive(Debug, Clone)]
pub struct Credential {
    value: Secret<String>,
    fetched_at: Instant,
    ttl: Duration,
}

impl Credential {
    /// Credential fetched now.
    pub fn new(value: impl Into<Secret<String>>, ttl: Duration) -> Self {
        Self::fetched_at(value, Instant::now(), ttl)
    }

    pub fn fetched_at(value: impl Into<Secret<String>>, fetched_at: Instant, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            fetched_at,
            ttl,
        }
    }

    pub fn value(&self) -> &Secret<String> {
        &self.value
    }

    pub fn fetched(&self) -> Instant {
        self.fetched_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the credential is still inside its TTL at `now`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.value.expose())
    }

    /// Same token string (not necessarily the same fetch).
    pub fn same_token(&self, other: &Credential) -> bool {
        self.value == other.value
    }
}
