//! Request descriptions: method, query parameters, per-call options

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::retry::RetryMarkers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// Ordered query parameters. Keys may repeat; order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.push(key, value);
        self
    }

    /// Add `key` only when `value` is present.
    pub fn param_opt<V: fmt::Display>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.0.push((key.into(), value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl<K: Into<String>, V: fmt::Display> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (k, v) in iter {
            params.push(k, v);
        }
        params
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Cancels the call when triggered; the call resolves to `Error::Cancelled`.
    pub cancel: Option<CancellationToken>,
    /// Overrides the client-wide per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Send without a credential. No refresh is attempted and a 401 is
    /// surfaced without ending the session.
    pub anonymous: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// One logical request plus the retries already spent on it.
///
/// Created per top-level call and never shared between calls.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub query: QueryParams,
    pub retry_count: u32,
    pub markers: RetryMarkers,
}

impl Attempt {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        body: Option<serde_json::Value>,
        query: QueryParams,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            query,
            retry_count: 0,
            markers: RetryMarkers::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("Delete".parse::<Method>().unwrap(), Method::Delete);
        assert!("PATCH".parse::<Method>().is_err());
        assert_eq!(Method::Put.to_string(), "PUT");
        assert_eq!(Method::Post.to_reqwest(), reqwest::Method::POST);
    }

    #[test]
    fn query_params_keep_order_and_skip_missing() {
        let limit: Option<u32> = None;
        let params = QueryParams::new()
            .param("organizationId", "abc123")
            .param_opt("limit", limit)
            .param("page", 2)
            .param("active", true);

        assert_eq!(params.len(), 3);
        assert_eq!(
            params.pairs(),
            &[
                ("organizationId".to_string(), "abc123".to_string()),
                ("page".to_string(), "2".to_string()),
                ("active".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn query_params_collect_from_pairs() {
        let params: QueryParams = [("a", 1), ("a", 2)].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert!(!params.is_empty());
        assert!(QueryParams::new().is_empty());
    }

    #[test]
    fn call_options_builders() {
        let token = CancellationToken::new();
        let options = CallOptions::new()
            .with_cancel(token.clone())
            .with_timeout(Duration::from_secs(2))
            .anonymous();
        assert!(options.anonymous);
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        token.cancel();
        assert!(options.cancel.unwrap().is_cancelled());
    }

    #[test]
    fn new_attempt_has_no_retries() {
        let attempt = Attempt::new(Method::Get, "/reports", None, QueryParams::new());
        assert_eq!(attempt.retry_count, 0);
        assert_eq!(attempt.markers, RetryMarkers::default());
    }
}
