//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens are loaded from env vars or a token file, never stored in the TOML
//! directly to avoid leaking secrets.

use common::Secret;
use request_orchestrator::ClientConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ClientConfig,
    /// Refresh-token flow. Without it the static `API_TOKEN` is used.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Static bearer token from `API_TOKEN`
    #[serde(skip)]
    pub token: Option<Secret<String>>,
}

/// OAuth2 token endpoint settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub token_endpoint: String,
    pub client_id: String,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
    /// Path to a file containing the refresh token (alternative to API_REFRESH_TOKEN env var)
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    /// Send the `id_token` instead of the `access_token`
    #[serde(default)]
    pub use_id_token: bool,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Refresh token resolution order:
    /// 1. API_REFRESH_TOKEN env var
    /// 2. refresh_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(endpoint) = std::env::var("API_ENDPOINT") {
            config.api.api_endpoint = endpoint;
        }
        if let Ok(stage) = std::env::var("API_STAGE") {
            config.api.stage = stage;
        }
        config.api.validate()?;

        match config.auth.as_mut() {
            Some(auth) => auth.resolve()?,
            None => {
                config.token = std::env::var("API_TOKEN")
                    .ok()
                    .map(|t| t.trim().to_owned())
                    .filter(|t| !t.is_empty())
                    .map(Secret::new);
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-call.toml")
    }
}

impl AuthConfig {
    fn resolve(&mut self) -> common::Result<()> {
        if !self.token_endpoint.starts_with("http://") && !self.token_endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "token_endpoint must start with http:// or https://, got: {}",
                self.token_endpoint
            )));
        }

        if let Ok(token) = std::env::var("API_REFRESH_TOKEN") {
            self.refresh_token = Some(Secret::new(token));
        } else if let Some(ref token_file) = self.refresh_token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read refresh_token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                self.refresh_token = Some(Secret::new(token));
            }
        }

        Ok(())
    }
}
