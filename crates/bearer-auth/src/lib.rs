//! Bearer credential management
//!
//! Keeps the current bearer credential and guarantees that at most one refresh
//! against the credential provider is outstanding at any time:
//!
//! 1. `CredentialCache` holds the last credential, no policy of its own
//! 2. `RefreshCoordinator::ensure_fresh()` returns the cached credential while it
//!    is inside its TTL, otherwise starts (or joins) the single in-flight refresh
//! 3. Every caller that joined a refresh receives the same credential or the same
//!    error when it settles
//!
//! `RefreshTokenProvider` is a `CredentialProvider` backed by an OAuth2 token
//! endpoint (`grant_type=refresh_token`).

pub mod cache;
pub mod error;
pub mod refresh;
pub mod token;

pub use cache::CredentialCache;
pub use error::{Error, Result};
pub use refresh::RefreshCoordinator;
pub use token::{RefreshTokenProvider, TokenResponse, refresh_token};
