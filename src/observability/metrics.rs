/// Prometheusメトリクス定義。
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, Registry, histogram_opts, opts,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    /// Finished runs, labelled `outcome` = `succeeded` | `failed`.
    pub runs_total: CounterVec,
    /// Stage outcomes, labelled `stage` and `status` = `ok` | `skipped` | `failed`.
    pub stage_outcomes: CounterVec,
    pub records_created: Counter,
    pub records_existing: Counter,
    pub candidates_dropped: Counter,
    pub retries_total: Counter,
    pub batches_total: Counter,
    pub webhook_requests: Counter,

    // ヒストグラム
    pub run_duration: Histogram,
    pub batch_duration: Histogram,

    // ゲージ
    pub active_runs: Gauge,
}

impl Metrics {
    /// Registers every collector on `registry`.
    ///
    /// # Errors
    /// Fails when a collector with the same name is already registered.
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            runs_total: register_counter_vec_with_registry!(
                opts!("wandr_runs_total", "Total number of pipeline runs"),
                &["outcome"],
                registry
            )?,
            stage_outcomes: register_counter_vec_with_registry!(
                opts!(
                    "wandr_stage_outcomes_total",
                    "Pipeline stage outcomes by stage and status"
                ),
                &["stage", "status"],
                registry
            )?,
            records_created: register_counter_with_registry!(
                "wandr_records_created_total",
                "Place records created in the record sink",
                registry
            )?,
            records_existing: register_counter_with_registry!(
                "wandr_records_existing_total",
                "Place records the sink already held",
                registry
            )?,
            candidates_dropped: register_counter_with_registry!(
                "wandr_candidates_dropped_total",
                "Place candidates dropped by validation",
                registry
            )?,
            retries_total: register_counter_with_registry!(
                "wandr_provider_retries_total",
                "Total number of provider call retries",
                registry
            )?,
            batches_total: register_counter_with_registry!(
                "wandr_batches_total",
                "Total number of pending sweeps",
                registry
            )?,
            webhook_requests: register_counter_with_registry!(
                "wandr_webhook_requests_total",
                "Total number of webhook process requests",
                registry
            )?,
            run_duration: register_histogram_with_registry!(
                histogram_opts!(
                    "wandr_run_duration_seconds",
                    "Duration of a single pipeline run",
                    vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
                ),
                registry
            )?,
            batch_duration: register_histogram_with_registry!(
                "wandr_batch_duration_seconds",
                "Duration of a pending sweep",
                registry
            )?,
            active_runs: register_gauge_with_registry!(
                "wandr_active_runs",
                "Number of pipeline runs in progress",
                registry
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn registers_on_a_private_registry() {
        let registry = Arc::new(Registry::new());
        let metrics = Metrics::new(Arc::clone(&registry)).expect("metrics");
        metrics
            .stage_outcomes
            .with_label_values(&["acquire", "ok"])
            .inc();

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .expect("encode");
        let rendered = String::from_utf8(buffer).expect("utf8");
        assert!(rendered.contains(r#"wandr_stage_outcomes_total{stage="acquire",status="ok"} 1"#));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Arc::new(Registry::new());
        Metrics::new(Arc::clone(&registry)).expect("first");
        assert!(Metrics::new(registry).is_err());
    }
}
