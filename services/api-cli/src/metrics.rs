//! Prometheus exposition for `--metrics`
//!
//! Renders the request metrics recorded by `request_orchestrator::metrics`:
//!
//! - `api_requests_total` (counter): labels `method`, `outcome`
//! - `api_request_duration_seconds` (histogram): label `method`
//! - `api_retries_total` (counter): label `class`
//! - `api_sign_outs_total` (counter)

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use request_orchestrator::metrics::DURATION_BUCKETS;

/// Builder with histogram buckets for the request duration, so it renders as a
/// Prometheus histogram rather than a summary.
fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("api_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the global recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

#[cfg(test)]
mod tests {
    use super::*;
    use request_orchestrator::metrics::{record_request, record_retry};

    #[test]
    fn rendered_output_has_histogram_buckets() {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("GET", "ok", 0.003);
        record_retry("network");

        let output = handle.render();
        assert!(output.contains("api_request_duration_seconds_bucket"));
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"+Inf\""));
        assert!(output.contains("api_retries_total{class=\"network\"} 1"));
    }
}
