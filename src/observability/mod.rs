pub mod metrics;
pub(crate) mod tracing;

use std::sync::Arc;

use anyhow::Result;
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;

/// Telemetry（メトリクスとトレーシング）を管理する構造体。
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// 新しいTelemetryインスタンスを作成し、トレーシングとメトリクスを初期化する。
    ///
    /// # Errors
    /// Fails when the subscriber cannot be installed or a collector cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        tracing::init()?;
        Self::without_tracing()
    }

    /// Metrics on a fresh registry, leaving the global subscriber alone.
    ///
    /// # Errors
    /// Fails when a collector cannot be registered.
    pub fn without_tracing() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(Arc::clone(&registry))?);
        Ok(Self { registry, metrics })
    }

    /// メトリクスへのアクセスを提供する。
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Prometheusメトリクスをレンダリングする。
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
            ::tracing::warn!(error = %error, "failed to encode prometheus metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_reads_the_owned_registry() {
        let telemetry = Telemetry::without_tracing().expect("telemetry");
        telemetry.metrics().records_created.inc();

        let rendered = telemetry.render_prometheus();
        assert!(rendered.contains("wandr_records_created_total 1"));
    }
}
