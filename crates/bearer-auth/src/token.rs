//! OAuth2 refresh-token grant
//!
//! `refresh_token()` performs one `grant_type=refresh_token` exchange against a
//! token endpoint. `RefreshTokenProvider` wraps it as a `CredentialProvider`:
//! every fetch mints a new bearer token, rotating the stored refresh token when
//! the endpoint issues a new one.
//!
//! Cognito-style user pools answer with both an `id_token` and an
//! `access_token`; `use_id_token` selects which one becomes the bearer value.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use common::Secret;
use provider::{Credential, CredentialProvider, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Margin subtracted from `expires_in` so a token is replaced before the API
/// starts rejecting it.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Only present when the endpoint rotates refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// Exchange a refresh token for a new token set.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(token_endpoint)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", client_id),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403, or 400 invalid_grant, means the refresh token is revoked or expired
        if status.as_u16() == 401
            || status.as_u16() == 403
            || (status.as_u16() == 400 && body.contains("invalid_grant"))
        {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Credential provider backed by a token endpoint.
pub struct RefreshTokenProvider {
    client: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    refresh: Mutex<Secret<String>>,
    use_id_token: bool,
    max_ttl: Duration,
}

impl RefreshTokenProvider {
    /// `max_ttl` caps how long an issued token is considered fresh, regardless
    /// of what the endpoint reports.
    pub fn new(
        client: reqwest::Client,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        refresh: Secret<String>,
        max_ttl: Duration,
    ) -> Self {
        Self {
            client,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            refresh: Mutex::new(refresh),
            use_id_token: false,
            max_ttl,
        }
    }

    /// Use the `id_token` from the response as the bearer value when present.
    pub fn with_id_token(mut self, use_id_token: bool) -> Self {
        self.use_id_token = use_id_token;
        self
    }

    fn current_refresh(&self) -> Secret<String> {
        self.refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn credential_from(&self, response: TokenResponse) -> Credential {
        if let Some(rotated) = response.refresh_token {
            *self.refresh.lock().unwrap_or_else(PoisonError::into_inner) = Secret::new(rotated);
            debug!("refresh token rotated");
        }

        let ttl = Duration::from_secs(response.expires_in)
            .saturating_sub(EXPIRY_MARGIN)
            .min(self.max_ttl);

        let bearer = match response.id_token {
            Some(id_token) if self.use_id_token => id_token,
            _ => response.access_token,
        };
        Credential::new(bearer, ttl)
    }
}

impl CredentialProvider for RefreshTokenProvider {
    fn id(&self) -> &str {
        "refresh-token"
    }

    fn fetch_token(
        &self,
        force_refresh: bool,
    ) -> Pin<Box<dyn Future<Output = provider::Result<Credential>> + Send + '_>> {
        Box::pin(async move {
            let refresh = self.current_refresh();
            if refresh.is_blank() {
                return Err(ProviderError::Auth("no refresh token available".into()));
            }

            let response = refresh_token(
                &self.client,
                &self.token_endpoint,
                &self.client_id,
                refresh.expose(),
            )
            .await?;

            let credential = self.credential_from(response);
            info!(
                force_refresh,
                ttl_secs = credential.ttl().as_secs(),
                "token endpoint issued credential"
            );
            Ok(credential)
        })
    }
}
