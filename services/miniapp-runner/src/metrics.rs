//! Prometheus metrics exposition
//!
//! - `parser_cycles_total` (counter): labels `outcome`, `kind`
//! - `parser_cycle_duration_seconds` (histogram): successful cycles only
//! - `parser_token_acquisitions_total` (counter): label `username`

use std::time::Duration;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use miniapp_parser::{CycleObserver, Error};

const CYCLE_DURATION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("parser_cycle_duration_seconds".to_string()),
        CYCLE_DURATION_BUCKETS,
    )?)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Feeds cycle outcomes into the global metrics recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl CycleObserver for MetricsObserver {
    fn cycle_succeeded(&self, _username: &str, elapsed: Duration) {
        metrics::counter!("parser_cycles_total", "outcome" => "success", "kind" => "none")
            .increment(1);
        metrics::histogram!("parser_cycle_duration_seconds").record(elapsed.as_secs_f64());
    }

    fn cycle_failed(&self, _username: Option<&str>, error: &Error) {
        metrics::counter!("parser_cycles_total", "outcome" => "failure", "kind" => error.kind())
            .increment(1);
    }

    fn token_acquired(&self, username: &str) {
        metrics::counter!("parser_token_acquisitions_total", "username" => username.to_string())
            .increment(1);
    }
}
