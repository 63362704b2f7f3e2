//! Authenticated API client
//!
//! Every call goes through the same pipeline:
//!
//! 1. The call is registered with the `LoadingTracker`
//! 2. A fresh credential is obtained from the `RefreshCoordinator` (cached,
//!    or the shared in-flight refresh)
//! 3. The request is sent with `Authorization: Bearer`, `Content-Type` and
//!    `X-Request-Id` headers and a per-attempt timeout
//! 4. A failure is classified and the `RetryPolicy` decides on one recovery
//!    per category; anything it declines is surfaced as a typed `Error`
//! 5. When authentication cannot be recovered the cached credential is dropped
//!    and the `SessionHook` is told to sign out, exactly once per call
//!
//! A `CancellationToken` in `CallOptions` aborts the call at any suspension
//! point. Cancellation never signs the session out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bearer_auth::RefreshCoordinator;
use provider::{Credential, CredentialProvider, LoadingSink, SessionHook};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::classify::{AttemptFailure, ErrorClass, ErrorClassifier, HeuristicClassifier};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::loading::LoadingTracker;
use crate::metrics;
use crate::request::{Attempt, CallOptions, Method, QueryParams};
use crate::retry::{Backoff, Recovery, RetryDecision, RetryPolicy, retry_with_backoff};

const REQUEST_ID_HEADER: &str = "x-request-id";

fn no_loading_sink() -> Arc<dyn LoadingSink> {
    Arc::new(|_: bool| {})
}

fn no_session_hook() -> Arc<dyn SessionHook> {
    Arc::new(|_: &str| {})
}

/// One attempt's outcome when it did not produce a decoded body.
enum SendError {
    /// Eligible for classification and retry
    Failed(AttemptFailure),
    /// Surfaced as-is
    Fatal(Error),
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    refresh: RefreshCoordinator,
    loading: LoadingTracker,
    classifier: Arc<dyn ErrorClassifier>,
    policy: RetryPolicy,
    backoff_base: Duration,
    max_retries: u32,
    session: Arc<dyn SessionHook>,
}

/// Cheap to clone; clones share the credential cache, the loading tracker and
/// the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    provider: Arc<dyn CredentialProvider>,
    loading_sink: Option<Arc<dyn LoadingSink>>,
    session_hook: Option<Arc<dyn SessionHook>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    http: Option<reqwest::Client>,
}

impl ApiClientBuilder {
    pub fn loading_sink(mut self, sink: Arc<dyn LoadingSink>) -> Self {
        self.loading_sink = Some(sink);
        self
    }

    pub fn session_hook(mut self, hook: Arc<dyn SessionHook>) -> Self {
        self.session_hook = Some(hook);
        self
    }

    /// Replace the default `HeuristicClassifier`.
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots). Per-attempt
    /// timeouts are still applied per request.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> common::Result<ApiClient> {
        self.config.validate()?;

        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder().build().map_err(|e| {
                common::Error::Config(format!("failed to build HTTP client: {e}"))
            })?,
        };

        let loading = LoadingTracker::new(
            self.loading_sink.unwrap_or_else(no_loading_sink),
            self.config.loading_delay(),
        );

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                http,
                base_url: self.config.base_url(),
                timeout: self.config.timeout(),
                refresh: RefreshCoordinator::new(self.provider),
                loading,
                classifier: self
                    .classifier
                    .unwrap_or_else(|| Arc::new(HeuristicClassifier::new())),
                policy: RetryPolicy::new(self.config.network_retry_delay()),
                backoff_base: self.config.backoff_base(),
                max_retries: self.config.max_retries,
                session: self.session_hook.unwrap_or_else(no_session_hook),
            }),
        })
    }
}

impl ApiClient {
    pub fn builder(config: ClientConfig, provider: Arc<dyn CredentialProvider>) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            provider,
            loading_sink: None,
            session_hook: None,
            classifier: None,
            http: None,
        }
    }

    /// Client with no loading sink and no session hook.
    pub fn new(config: ClientConfig, provider: Arc<dyn CredentialProvider>) -> common::Result<Self> {
        Self::builder(config, provider).build()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn loading(&self) -> &LoadingTracker {
        &self.inner.loading
    }

    pub fn credentials(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    /// Drop the cached credential, e.g. after an application-initiated sign-out.
    pub fn clear_credentials(&self) {
        self.inner.refresh.invalidate();
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<QueryParams>,
        options: CallOptions,
    ) -> Result<T> {
        self.call(Method::Get, path, None, query, options).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: CallOptions,
    ) -> Result<T> {
        self.call(Method::Post, path, body, None, options).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: CallOptions,
    ) -> Result<T> {
        self.call(Method::Put, path, body, None, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<QueryParams>,
        options: CallOptions,
    ) -> Result<T> {
        self.call(Method::Delete, path, None, query, options).await
    }

    /// Issue one logical request, with the built-in per-category recovery.
    ///
    /// An empty success body decodes as JSON `null`, so `()`, `Option<_>` and
    /// `Value` all accept it.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: Option<QueryParams>,
        options: CallOptions,
    ) -> Result<T> {
        let _loading = self.inner.loading.track();
        self.call_untracked(method, path, body, query, options).await
    }

    /// `call()` wrapped in a bounded outer retry with exponential spacing
    /// (`backoff_base * 2^i` after attempt `i`). `max_attempts` defaults to the
    /// configured `max_retries`. Cancellation and auth failures end the loop
    /// immediately, including during a backoff wait.
    ///
    /// The whole loop counts as one active request for the loading indicator.
    pub async fn call_with_retry<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: Option<QueryParams>,
        options: CallOptions,
        max_attempts: Option<u32>,
    ) -> Result<T> {
        let backoff = Backoff::new(
            self.inner.backoff_base,
            max_attempts.unwrap_or(self.inner.max_retries),
        );
        let _loading = self.inner.loading.track();
        let cancel = options.cancel.clone();
        let client = self;
        let retried = retry_with_backoff(
            backoff,
            move || {
                client.call_untracked(method, path, body.clone(), query.clone(), options.clone())
            },
            Error::is_retryable,
        );
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(method = %method, path = %path, "API call cancelled");
                    Err(Error::Cancelled)
                }
                result = retried => result,
            },
            None => retried.await,
        }
    }

    /// Start a call on its own task and return a handle that can cancel it.
    ///
    /// Dropping the handle does not cancel the call.
    pub fn cancelable<T>(
        &self,
        method: Method,
        path: impl Into<String>,
        body: Option<Value>,
        query: Option<QueryParams>,
        options: CallOptions,
    ) -> CancelableCall<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let token = options.cancel.clone().unwrap_or_default();
        let options = options.with_cancel(token.clone());
        let client = self.clone();
        let path = path.into();
        let handle =
            tokio::spawn(async move { client.call(method, &path, body, query, options).await });
        CancelableCall { handle, token }
    }

    /// One logical request without registering it with the `LoadingTracker`.
    async fn call_untracked<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: Option<QueryParams>,
        options: CallOptions,
    ) -> Result<T> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        let span = info_span!("api_call", request_id = %request_id, method = %method, path = %path);
        self.run(method, path, body, query, options, &request_id)
            .instrument(span)
            .await
    }

    async fn run<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: Option<QueryParams>,
        options: CallOptions,
        request_id: &str,
    ) -> Result<T> {
        let started = Instant::now();

        let attempt = Attempt::new(method, path, body, query.unwrap_or_default());
        let execution = self.execute(attempt, &options, request_id);
        let result = match options.cancel.as_ref() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                result = execution => result,
            },
            None => execution.await,
        };
        let result = result.and_then(|value| {
            serde_json::from_value::<T>(value).map_err(|e| Error::Decode(e.to_string()))
        });

        let elapsed = started.elapsed();
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().label(),
        };
        metrics::record_request(method.as_str(), outcome, elapsed.as_secs_f64());

        match &result {
            Ok(_) => debug!(elapsed_ms = elapsed.as_millis() as u64, "API call succeeded"),
            Err(Error::Cancelled) => debug!("API call cancelled"),
            Err(e) => error!(
                error = %e,
                kind = %e.kind(),
                elapsed_ms = elapsed.as_millis() as u64,
                "API call failed"
            ),
        }
        result
    }

    async fn execute(
        &self,
        mut attempt: Attempt,
        options: &CallOptions,
        request_id: &str,
    ) -> Result<Value> {
        let mut credential = if options.anonymous {
            None
        } else {
            Some(self.credential(false, None).await?)
        };

        loop {
            let failure = match self
                .send(&attempt, credential.as_ref(), options, request_id)
                .await
            {
                Ok(value) => return Ok(value),
                Err(SendError::Fatal(e)) => return Err(e),
                Err(SendError::Failed(failure)) => failure,
            };

            let class = self.inner.classifier.classify(&failure);
            let decision = if options.anonymous && class == ErrorClass::Auth {
                RetryDecision::GiveUp
            } else {
                self.inner.policy.should_retry(&attempt, class)
            };
            let RetryDecision::Retry { delay, recovery } = decision else {
                return Err(self.surface(failure, class, options.anonymous));
            };

            warn!(
                class = %class,
                retry = attempt.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                failure = %failure.message(),
                "attempt failed, retrying"
            );
            metrics::record_retry(class.label());
            attempt.mark_retry(class);

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if recovery == Recovery::ForceRefresh && !options.anonymous {
                credential = Some(self.credential(true, failure.status()).await?);
            }
        }
    }

    /// A provider failure is unrecoverable for this call and ends the session.
    async fn credential(&self, force_refresh: bool, status: Option<u16>) -> Result<Credential> {
        self.inner
            .refresh
            .ensure_fresh(force_refresh)
            .await
            .map_err(|e| self.end_session(status, format!("credential refresh failed: {e}")))
    }

    async fn send(
        &self,
        attempt: &Attempt,
        credential: Option<&Credential>,
        options: &CallOptions,
        request_id: &str,
    ) -> std::result::Result<Value, SendError> {
        let url = self.url_for(&attempt.path);
        let mut request = self
            .inner
            .http
            .request(attempt.method.to_reqwest(), &url)
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, request_id)
            .timeout(options.timeout.unwrap_or(self.inner.timeout));

        if let Some(credential) = credential {
            let mut value = HeaderValue::from_str(&credential.authorization()).map_err(|_| {
                SendError::Fatal(Error::Unknown(
                    "credential is not a valid header value".into(),
                ))
            })?;
            value.set_sensitive(true);
            request = request.header(AUTHORIZATION, value);
        }
        if !attempt.query.is_empty() {
            request = request.query(attempt.query.pairs());
        }
        if let Some(body) = &attempt.body {
            request = request.json(body);
        }

        debug!(url = %url, retry = attempt.retry_count, "sending request");
        let response = request
            .send()
            .await
            .map_err(|e| SendError::Failed(AttemptFailure::from_reqwest(&e)))?;

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            // A response arrived, so the status decides the class
            Err(e) if !status.is_success() => {
                debug!(status = status.as_u16(), error = %e, "failed to read error body");
                String::new()
            }
            Err(e) => {
                return Err(SendError::Fatal(Error::Unknown(format!(
                    "failed to read response body: {e}"
                ))));
            }
        };

        if !status.is_success() {
            return Err(SendError::Failed(AttemptFailure::Status {
                status: status.as_u16(),
                body: text,
            }));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| SendError::Fatal(Error::Decode(e.to_string())))
    }

    fn surface(&self, failure: AttemptFailure, class: ErrorClass, anonymous: bool) -> Error {
        match (class, failure) {
            (ErrorClass::Auth, failure) if !anonymous => {
                self.end_session(failure.status(), failure.message())
            }
            (ErrorClass::Auth, failure) => Error::Auth {
                status: failure.status(),
                message: failure.message(),
            },
            (ErrorClass::Cors, failure) => Error::Cors(failure.message()),
            (ErrorClass::Network, failure) => Error::Network(failure.message()),
            (ErrorClass::Unknown, AttemptFailure::Status { status, body }) => {
                Error::Http { status, body }
            }
            (ErrorClass::Unknown, failure) => Error::Unknown(failure.message()),
        }
    }

    fn end_session(&self, status: Option<u16>, message: String) -> Error {
        self.inner.refresh.invalidate();
        warn!(status, reason = %message, "authentication failed, signing out");
        metrics::record_sign_out();
        self.inner.session.sign_out(&message);
        Error::Auth { status, message }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }
}

/// Handle to a call started with `ApiClient::cancelable()`.
#[must_use = "the call result is only observable through join()"]
pub struct CancelableCall<T> {
    handle: JoinHandle<Result<T>>,
    token: CancellationToken,
}

impl<T> CancelableCall<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn join(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::Unknown(format!("call task failed: {e}"))),
        }
    }
}
