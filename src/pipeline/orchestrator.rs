//! Pipeline orchestrator and builder for the place extraction pipeline.

use std::{num::NonZeroUsize, sync::Arc};

use thiserror::Error;
use tracing::{Instrument, info_span};

use super::{
    assemble::RunRecorder,
    cache::ArtifactStore,
    executor::StageExecutor,
    identifier::RunIdentifier,
    location::LocationStageGroup,
    model::{PipelineRunResult, RunMode, RunOptions, SkipReason, Stage, StageOutcome},
    pending::PendingSource,
    persist::RecordSink,
    video::VideoStageGroup,
};
use crate::{observability::metrics::Metrics, util::idempotency::RunLocks};

/// Sequences the stage groups for one URL at a time and owns the
/// per-identifier locks shared by concurrent batch workers.
pub struct PipelineOrchestrator {
    pub(super) stages: PipelineStages,
    pub(super) artifacts: Arc<dyn ArtifactStore>,
    pub(super) locks: RunLocks,
    pub(super) batch_concurrency: NonZeroUsize,
    pub(super) metrics: Option<Arc<Metrics>>,
}

/// Container for all pipeline stages.
pub(crate) struct PipelineStages {
    pub(super) video: VideoStageGroup,
    pub(super) location: LocationStageGroup,
    pub(super) sink: Option<Arc<dyn RecordSink>>,
    pub(super) pending: Option<Arc<dyn PendingSource>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("pipeline is missing the {0} stage group")]
    MissingStage(&'static str),
}

/// Builder pattern for constructing `PipelineOrchestrator`.
#[derive(Default)]
pub struct PipelineBuilder {
    video: Option<VideoStageGroup>,
    location: Option<LocationStageGroup>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    sink: Option<Arc<dyn RecordSink>>,
    pending: Option<Arc<dyn PendingSource>>,
    batch_concurrency: Option<NonZeroUsize>,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    #[must_use]
    pub fn has_pending_source(&self) -> bool {
        self.stages.pending.is_some()
    }

    #[must_use]
    pub fn batch_concurrency(&self) -> NonZeroUsize {
        self.batch_concurrency
    }

    /// Runs the pipeline for one URL. Never fails: every error ends up in a
    /// stage outcome of the returned result.
    pub async fn run_one(&self, url: &str, options: &RunOptions) -> PipelineRunResult {
        let mut run = RunRecorder::start(url, options.mode, self.metrics.clone());

        let id = match RunIdentifier::resolve(url) {
            Ok(id) => {
                run.record(Stage::Resolve, StageOutcome::succeeded().with_detail(id.as_str()));
                id
            }
            Err(error) => {
                run.record(Stage::Resolve, StageOutcome::failed(error));
                return run.finish();
            }
        };
        run.set_identifier(id.clone());

        let span = info_span!(
            "pipeline_run",
            identifier = %id,
            mode = options.mode.as_str()
        );
        async {
            let _guard = self.locks.acquire(id.as_str()).await;
            let executor = StageExecutor::new(self, &id, url, options);

            let Some(video) = executor.execute_video_stages(&mut run).await else {
                return;
            };
            let combined = executor.execute_combine(&mut run, &video);
            run.set_video_result(video.clone());

            if options.mode == RunMode::VideoOnly {
                run.record_all(
                    &[Stage::Analyze, Stage::Enrich, Stage::Persist],
                    &StageOutcome::skipped(SkipReason::Mode),
                );
                return;
            }

            let candidates = executor
                .execute_location_stages(&mut run, &video, &combined)
                .await;
            executor.execute_persist_stage(&mut run, &candidates).await;
            run.set_candidates(candidates);
        }
        .instrument(span)
        .await;

        run.finish()
    }
}

impl PipelineBuilder {
    #[must_use]
    pub fn with_video_stages(mut self, stages: VideoStageGroup) -> Self {
        self.video = Some(stages);
        self
    }

    #[must_use]
    pub fn with_location_stages(mut self, stages: LocationStageGroup) -> Self {
        self.location = Some(stages);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    #[must_use]
    pub fn with_record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_pending_source(mut self, pending: Arc<dyn PendingSource>) -> Self {
        self.pending = Some(pending);
        self
    }

    #[must_use]
    pub fn with_batch_concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.batch_concurrency = Some(concurrency);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    /// Returns [`BuildError::MissingStage`] when the video group, location
    /// group or artifact store was not provided.
    pub fn build(self) -> Result<PipelineOrchestrator, BuildError> {
        Ok(PipelineOrchestrator {
            stages: PipelineStages {
                video: self.video.ok_or(BuildError::MissingStage("video"))?,
                location: self.location.ok_or(BuildError::MissingStage("location"))?,
                sink: self.sink,
                pending: self.pending,
            },
            artifacts: self.artifacts.ok_or(BuildError::MissingStage("artifact"))?,
            locks: RunLocks::default(),
            batch_concurrency: self.batch_concurrency.unwrap_or(NonZeroUsize::MIN),
            metrics: self.metrics,
        })
    }
}
