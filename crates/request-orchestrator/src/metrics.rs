//! Call metrics
//!
//! Recorded through the `metrics` facade; the host application decides whether
//! and where to export them.
//!
//! - `api_requests_total` (counter): labels `method`, `outcome`
//! - `api_request_duration_seconds` (histogram): label `method`
//! - `api_retries_total` (counter): label `class`
//! - `api_sign_outs_total` (counter)

/// Histogram buckets for `api_request_duration_seconds`, 5ms to 30s.
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Record a finished call. `outcome` is `ok` or an error kind label.
pub fn record_request(method: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!("api_requests_total", "method" => method.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    metrics::histogram!("api_request_duration_seconds", "method" => method.to_string())
        .record(duration_secs);
}

pub fn record_retry(class: &str) {
    metrics::counter!("api_retries_total", "class" => class.to_string()).increment(1);
}

pub fn record_sign_out() {
    metrics::counter!("api_sign_outs_total").increment(1);
}
