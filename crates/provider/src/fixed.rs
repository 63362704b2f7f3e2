//! Fixed token provider: a single pre-issued token.
//!
//! Used for service accounts and local tooling where the token is supplied out of
//! band (e.g. the `API_TOKEN` env var). A forced refresh cannot mint anything new,
//! so it hands back the same token and lets the API decide.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use tracing::debug;

use crate::{Credential, CredentialProvider, ProviderError};

pub struct FixedTokenProvider {
    token: Secret<String>,
    ttl: Duration,
}

impl FixedTokenProvider {
    pub fn new(token: impl Into<Secret<String>>, ttl: Duration) -> Self {
        Self {
            token: token.into(),
            ttl,
        }
    }
}

impl CredentialProvider for FixedTokenProvider {
    fn id(&self) -> &str {
        "fixed"
    }

    fn fetch_token(
        &self,
        force_refresh: bool,
    ) -> Pin<Box<dyn Future<Output = crate::Result<Credential>> + Send + '_>> {
        Box::pin(async move {
            if self.token.is_blank() {
                return Err(ProviderError::Auth("no token configured".into()));
            }
            debug!(force_refresh, "issuing fixed token");
            Ok(Credential::new(self.token.clone(), self.ttl))
        })
    }
}
