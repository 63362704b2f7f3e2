//! Client settings
//!
//! Deserializable so a host application can embed it in its own TOML file;
//! every field except `api_endpoint` has a default.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Scheme and host of the API, e.g. `https://api.example.com`
    pub api_endpoint: String,
    /// Deployment stage appended to the endpoint path
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How long calls must be in flight before the loading indicator shows
    #[serde(default = "default_loading_delay_ms")]
    pub loading_delay_ms: u64,
    /// Total attempts for `call_with_retry` when the caller passes none
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Wait before the single retry of a network failure
    #[serde(default = "default_network_retry_delay_ms")]
    pub network_retry_delay_ms: u64,
    /// Upper bound on credential freshness for providers that don't report one
    #[serde(default = "default_credential_ttl_secs")]
    pub credential_ttl_secs: u64,
}

fn default_stage() -> String {
    "dev".into()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_loading_delay_ms() -> u64 {
    400
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_network_retry_delay_ms() -> u64 {
    1_000
}

fn default_credential_ttl_secs() -> u64 {
    55 * 60
}

impl ClientConfig {
    pub fn new(api_endpoint: impl Into<String>) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
            stage: default_stage(),
            timeout_ms: default_timeout_ms(),
            loading_delay_ms: default_loading_delay_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            network_retry_delay_ms: default_network_retry_delay_ms(),
            credential_ttl_secs: default_credential_ttl_secs(),
        }
    }

    /// `<api_endpoint>/<stage>`, or just the endpoint when the stage is empty.
    pub fn base_url(&self) -> String {
        let endpoint = self.api_endpoint.trim_end_matches('/');
        let stage = self.stage.trim_matches('/');
        if stage.is_empty() {
            endpoint.to_string()
        } else {
            format!("{endpoint}/{stage}")
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        if !self.api_endpoint.starts_with("http://") && !self.api_endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api_endpoint must start with http:// or https://, got: {}",
                self.api_endpoint
            )));
        }

        if self.timeout_ms == 0 {
            return Err(common::Error::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }

        if self.max_retries == 0 {
            return Err(common::Error::Config(
                "max_retries must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn loading_delay(&self) -> Duration {
        Duration::from_millis(self.loading_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn network_retry_delay(&self) -> Duration {
        Duration::from_millis(self.network_retry_delay_ms)
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }
}
