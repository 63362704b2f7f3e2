//! Authenticated request orchestration
//!
//! `ApiClient` wraps an HTTP API that expects a short-lived bearer token. It
//! keeps the token fresh without stampeding the credential provider, recovers
//! from the failures a token can cause, and reports in-flight activity:
//!
//! 1. Credentials come from a `RefreshCoordinator` (single-flight refresh)
//! 2. Failed attempts are classified (`ErrorClassifier`) into Auth, Cors,
//!    Network or Unknown
//! 3. `RetryPolicy` allows one recovery per category: Auth and Cors force a
//!    credential refresh, Network waits and resends
//! 4. Unrecoverable auth failures sign the session out through the
//!    `SessionHook`
//! 5. `LoadingTracker` drives a debounced loading indicator
//!
//! `call_with_retry()` adds an opt-in outer retry with exponential backoff, and
//! `cancelable()` runs a call on its own task with a cancel handle.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod loading;
pub mod metrics;
pub mod request;
pub mod retry;

pub use classify::{AttemptFailure, ErrorClass, ErrorClassifier, HeuristicClassifier};
pub use client::{ApiClient, ApiClientBuilder, CancelableCall};
pub use config::ClientConfig;
pub use error::{Error, ErrorKind, Result};
pub use loading::{LoadingGuard, LoadingTracker};
pub use request::{Attempt, CallOptions, Method, QueryParams};
pub use retry::{Backoff, Recovery, RetryDecision, RetryMarkers, RetryPolicy, retry_with_backoff};
pub use tokio_util::sync::CancellationToken;
