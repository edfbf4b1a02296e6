use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    identifier::RunIdentifier,
    model::{
        DroppedCandidate, PersistedRecord, PipelineRunResult, PlaceCandidate, RunMode, Stage,
        StageOutcome, VideoResult,
    },
};
use crate::observability::metrics::Metrics;

/// Builds a [`PipelineRunResult`] stage by stage and reports every outcome
/// to logs and metrics as it is recorded.
pub(crate) struct RunRecorder {
    result: PipelineRunResult,
    started: Instant,
    metrics: Option<Arc<Metrics>>,
}

impl RunRecorder {
    pub(crate) fn start(source_url: &str, mode: RunMode, metrics: Option<Arc<Metrics>>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.active_runs.inc();
        }
        let now = Utc::now();
        Self {
            result: PipelineRunResult {
                identifier: None,
                source_url: source_url.to_string(),
                mode,
                stage_outcomes: BTreeMap::new(),
                video_result: None,
                candidates: Vec::new(),
                dropped: Vec::new(),
                persist_receipts: Vec::new(),
                persisted_record_ids: Vec::new(),
                started_at: now,
                finished_at: now,
            },
            started: Instant::now(),
            metrics,
        }
    }

    pub(crate) fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        match (&outcome.error, outcome.skipped) {
            (Some(error), _) => warn!(stage = %stage, error = %error, "stage failed"),
            (None, Some(reason)) => debug!(stage = %stage, reason = ?reason, "stage skipped"),
            (None, None) => debug!(
                stage = %stage,
                detail = outcome.detail.as_deref().unwrap_or_default(),
                "stage completed"
            ),
        }
        if let Some(metrics) = &self.metrics {
            metrics
                .stage_outcomes
                .with_label_values(&[stage.as_str(), outcome.status()])
                .inc();
        }
        self.result.stage_outcomes.insert(stage, outcome);
    }

    /// Records the same outcome for several stages.
    pub(crate) fn record_all(&mut self, stages: &[Stage], outcome: &StageOutcome) {
        for stage in stages {
            self.record(*stage, outcome.clone());
        }
    }

    pub(crate) fn set_identifier(&mut self, identifier: RunIdentifier) {
        self.result.identifier = Some(identifier);
    }

    pub(crate) fn set_video_result(&mut self, video: VideoResult) {
        self.result.video_result = Some(video);
    }

    pub(crate) fn set_candidates(&mut self, candidates: Vec<PlaceCandidate>) {
        self.result.candidates = candidates;
    }

    pub(crate) fn add_dropped(&mut self, dropped: impl IntoIterator<Item = DroppedCandidate>) {
        let before = self.result.dropped.len();
        self.result.dropped.extend(dropped);
        if let Some(metrics) = &self.metrics {
            let added = self.result.dropped.len() - before;
            metrics.candidates_dropped.inc_by(added as f64);
        }
    }

    pub(crate) fn add_receipt(&mut self, record: PersistedRecord) {
        if let Some(metrics) = &self.metrics {
            if record.created {
                metrics.records_created.inc();
            } else {
                metrics.records_existing.inc();
            }
        }
        if record.created {
            self.result
                .persisted_record_ids
                .push(record.record_id.clone());
        }
        self.result.persist_receipts.push(record);
    }

    pub(crate) fn finish(mut self) -> PipelineRunResult {
        self.result.finished_at = Utc::now();
        let elapsed = self.started.elapsed();
        let succeeded = self.result.succeeded();

        if let Some(metrics) = &self.metrics {
            metrics.active_runs.dec();
            metrics
                .runs_total
                .with_label_values(&[if succeeded { "succeeded" } else { "failed" }])
                .inc();
            metrics.run_duration.observe(elapsed.as_secs_f64());
        }

        info!(
            identifier = self
                .result
                .identifier
                .as_ref()
                .map(RunIdentifier::as_str)
                .unwrap_or_default(),
            succeeded,
            candidates = self.result.candidates.len(),
            dropped = self.result.dropped.len(),
            persisted = self.result.persisted_record_ids.len(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "pipeline run finished"
        );

        self.result
    }
}
