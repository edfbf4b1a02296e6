//! Batch entry points: ordered multi-URL runs and the pending sweep.
use std::time::Instant;

use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{info, warn};

use super::{
    model::{PendingUrl, PipelineRunResult, ProcessedStatus, RunOptions},
    orchestrator::PipelineOrchestrator,
    pending::PendingSource,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItemResult {
    pub source_record_id: String,
    pub result: PipelineRunResult,
    /// Status written back to the pending source, if that succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marked: Option<ProcessedStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Percentage of items that succeeded, 0 to 100.
    pub success_rate: f64,
}

impl BatchSummary {
    #[must_use]
    pub fn from_items(items: &[BatchItemResult]) -> Self {
        let total_processed = items.len();
        let successful = items.iter().filter(|item| item.result.succeeded()).count();
        let errors = items
            .iter()
            .filter_map(|item| {
                item.result
                    .first_error()
                    .map(|error| format!("{}: {error}", item.result.source_url))
            })
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total_processed == 0 {
            0.0
        } else {
            successful as f64 * 100.0 / total_processed as f64
        };
        Self {
            total_processed,
            successful,
            failed: total_processed - successful,
            errors,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItemResult>,
    pub summary: BatchSummary,
    /// Set when the batch could not start, e.g. the pending source failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchReport {
    fn from_items(items: Vec<BatchItemResult>) -> Self {
        Self {
            summary: BatchSummary::from_items(&items),
            items,
            error: None,
        }
    }

    fn aborted(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// `true` when the batch started and every item succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.error.is_none() && self.summary.failed == 0
    }
}

impl PipelineOrchestrator {
    /// Runs every item and returns results in input order. One item's
    /// failure never stops the others.
    pub async fn run_batch(
        &self,
        items: &[PendingUrl],
        options: &RunOptions,
    ) -> Vec<BatchItemResult> {
        self.process_items(items, options, None).await
    }

    /// Pulls the pending source, runs the batch and marks each item
    /// `Completed` or `Failed` as soon as its run finishes.
    pub async fn run_pending(&self, options: &RunOptions) -> BatchReport {
        let Some(source) = self.stages.pending.as_deref() else {
            return BatchReport::aborted("no pending source configured");
        };
        let started = Instant::now();

        let batch = match source.pending().await {
            Ok(batch) => batch,
            Err(error) => {
                warn!(error = %error, "failed to load pending urls");
                return BatchReport::aborted(error.to_string());
            }
        };
        info!(count = batch.len(), "processing pending urls");

        let items = self.process_items(&batch, options, Some(source)).await;
        let report = BatchReport::from_items(items);

        if let Some(metrics) = &self.metrics {
            metrics.batches_total.inc();
            metrics.batch_duration.observe(started.elapsed().as_secs_f64());
        }
        info!(
            total = report.summary.total_processed,
            successful = report.summary.successful,
            failed = report.summary.failed,
            "pending sweep finished"
        );
        report
    }

    async fn process_items(
        &self,
        items: &[PendingUrl],
        options: &RunOptions,
        source: Option<&dyn PendingSource>,
    ) -> Vec<BatchItemResult> {
        // Futures are built up front so the buffered stream carries no
        // borrowing closure; the spawned sweep needs its future to be `Send`
        // for every lifetime.
        let mut runs = Vec::with_capacity(items.len());
        for item in items {
            runs.push(self.process_item(item, options, source));
        }
        stream::iter(runs)
            .buffered(self.batch_concurrency.get())
            .collect()
            .await
    }

    async fn process_item(
        &self,
        item: &PendingUrl,
        options: &RunOptions,
        source: Option<&dyn PendingSource>,
    ) -> BatchItemResult {
        let result = self.run_one(&item.source_url, options).await;
        let mut outcome = BatchItemResult {
            source_record_id: item.source_record_id.clone(),
            result,
            marked: None,
            mark_error: None,
        };
        let Some(source) = source else {
            return outcome;
        };

        let status = if outcome.result.succeeded() {
            ProcessedStatus::Completed
        } else {
            ProcessedStatus::Failed
        };
        match source.mark_processed(&item.source_record_id, status).await {
            Ok(()) => outcome.marked = Some(status),
            Err(error) => {
                warn!(
                    source_record_id = %item.source_record_id,
                    error = %error,
                    "failed to mark pending url"
                );
                outcome.mark_error = Some(error.to_string());
            }
        }
        outcome
    }
}
