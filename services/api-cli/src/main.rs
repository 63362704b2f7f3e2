//! api-call
//!
//! Issues one authenticated request against the configured API and prints the
//! JSON response:
//! 1. Loads `[api]` and optional `[auth]` configuration
//! 2. Builds a credential provider (refresh-token grant, or static `API_TOKEN`)
//! 3. Sends the request through `ApiClient`, with SIGINT/SIGTERM cancelling it
//! 4. Prints the decoded body to stdout; logs go to stderr as JSON

mod args;
mod config;
mod metrics;

use anyhow::{Context, Result};
use bearer_auth::RefreshTokenProvider;
use provider::{CredentialProvider, FixedTokenProvider};
use request_orchestrator::{ApiClient, CallOptions, CancellationToken};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr with LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args = args::parse(std::env::args().skip(1))?;

    // Install before any metrics are emitted
    let prometheus = if args.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url(),
        timeout_ms = config.api.timeout_ms,
        refresh_flow = config.auth.is_some(),
        "configuration loaded"
    );

    let provider = build_provider(&config)?;
    let client = ApiClient::builder(config.api.clone(), provider)
        .session_hook(Arc::new(|reason: &str| {
            warn!(reason, "session signed out");
        }))
        .loading_sink(Arc::new(|loading: bool| {
            info!(loading, "request in progress");
        }))
        .build()
        .context("failed to build API client")?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let mut options = CallOptions::new().with_cancel(cancel);
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    let query = (!args.query.is_empty()).then_some(args.query);

    let result: request_orchestrator::Result<Value> = match args.retries {
        Some(attempts) => {
            client
                .call_with_retry(args.method, &args.path, args.data, query, options, Some(attempts))
                .await
        }
        None => {
            client
                .call(args.method, &args.path, args.data, query, options)
                .await
        }
    };

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }

    let body = result.with_context(|| format!("{} {} failed", args.method, args.path))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Refresh-token grant when `[auth]` is configured, otherwise the static token.
fn build_provider(config: &Config) -> Result<Arc<dyn CredentialProvider>> {
    let ttl = config.api.credential_ttl();
    match &config.auth {
        Some(auth) => {
            let refresh = auth
                .refresh_token
                .clone()
                .context("no refresh token: set API_REFRESH_TOKEN or refresh_token_file")?;
            let http = reqwest::Client::builder()
                .timeout(config.api.timeout())
                .build()
                .context("failed to build token endpoint client")?;
            Ok(Arc::new(
                RefreshTokenProvider::new(http, &auth.token_endpoint, &auth.client_id, refresh, ttl)
                    .with_id_token(auth.use_id_token),
            ))
        }
        None => {
            let token = config
                .token
                .clone()
                .context("no credentials: set API_TOKEN or configure [auth]")?;
            Ok(Arc::new(FixedTokenProvider::new(token, ttl)))
        }
    }
}

/// Cancel the in-flight call on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, cancelling request"),
        _ = terminate => info!("received SIGTERM, cancelling request"),
    }
    cancel.cancel();
}
