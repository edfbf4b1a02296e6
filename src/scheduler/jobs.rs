use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{BatchReport, PipelineOrchestrator, RunOptions};

/// Runs pending sweeps, one at a time, for the daemon and the control plane.
#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<PipelineOrchestrator>,
    options: RunOptions,
    running: Arc<Mutex<()>>,
}

impl Scheduler {
    pub(crate) fn new(pipeline: Arc<PipelineOrchestrator>, options: RunOptions) -> Self {
        Self {
            pipeline,
            options,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn pipeline(&self) -> &Arc<PipelineOrchestrator> {
        &self.pipeline
    }

    /// Whether a pending source is configured at all.
    pub(crate) fn can_sweep(&self) -> bool {
        self.pipeline.has_pending_source()
    }

    /// Runs one sweep over the pending source.
    ///
    /// Returns `None` without doing anything when another sweep is still in
    /// progress.
    pub(crate) async fn run_sweep(&self, trigger: &'static str) -> Option<BatchReport> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!(trigger, "pending sweep already running, skipping");
            return None;
        };

        let sweep_id = Uuid::new_v4();
        info!(%sweep_id, trigger, "pending sweep started");
        let report = self.pipeline.run_pending(&self.options).await;
        match &report.error {
            Some(error) => warn!(%sweep_id, trigger, error = %error, "pending sweep aborted"),
            None => info!(
                %sweep_id,
                trigger,
                processed = report.summary.total_processed,
                successful = report.summary.successful,
                failed = report.summary.failed,
                "sweep trigger completed"
            ),
        }
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{
            AnalyzeStage, EnrichStage, LocationStageGroup, PendingSource, VideoStageGroup,
            model::{
                AnalysisHints, MediaReference, PendingUrlBatch, PlaceCandidate, PlaceDetails,
                ProcessedStatus,
            },
            video::AcquireStage,
            identifier::RunIdentifier,
        },
        store::MemoryArtifactStore,
        util::error::StageError,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoMedia;

    #[async_trait]
    impl AcquireStage for NoMedia {
        async fn acquire(
            &self,
            _url: &str,
            id: &RunIdentifier,
        ) -> Result<MediaReference, StageError> {
            Err(StageError::NotFound(id.to_string()))
        }
    }

    struct Nothing;

    #[async_trait]
    impl AnalyzeStage for Nothing {
        async fn analyze(
            &self,
            _text: &str,
            _hints: &AnalysisHints,
        ) -> Result<Vec<PlaceCandidate>, StageError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl EnrichStage for Nothing {
        async fn enrich(&self, _name: &str, _hint: &str) -> Result<PlaceDetails, StageError> {
            Ok(PlaceDetails::not_found())
        }
    }

    /// Holds the sweep open long enough for a second trigger to collide.
    struct SlowSource;

    #[async_trait]
    impl PendingSource for SlowSource {
        async fn pending(&self) -> Result<PendingUrlBatch, StageError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Vec::new())
        }

        async fn mark_processed(
            &self,
            _id: &str,
            _status: ProcessedStatus,
        ) -> Result<(), StageError> {
            Ok(())
        }
    }

    fn scheduler(with_source: bool) -> Scheduler {
        let mut builder = PipelineOrchestrator::builder()
            .with_video_stages(VideoStageGroup::new(Arc::new(NoMedia), None, None))
            .with_location_stages(LocationStageGroup::new(Arc::new(Nothing), Arc::new(Nothing)))
            .with_artifacts(Arc::new(MemoryArtifactStore::default()));
        if with_source {
            builder = builder.with_pending_source(Arc::new(SlowSource));
        }
        Scheduler::new(Arc::new(builder.build().expect("pipeline")), RunOptions::default())
    }

    #[tokio::test]
    async fn overlapping_sweeps_are_skipped() {
        let scheduler = scheduler(true);
        let (first, second) = tokio::join!(scheduler.run_sweep("daemon"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            scheduler.run_sweep("webhook").await
        });

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn missing_source_yields_an_error_report() {
        let scheduler = scheduler(false);
        assert!(!scheduler.can_sweep());

        let report = scheduler.run_sweep("webhook").await.expect("report");
        assert!(report.error.is_some());
        assert_eq!(report.summary.total_processed, 0);
    }

    #[tokio::test]
    async fn sweep_can_run_on_a_spawned_task() {
        let scheduler = scheduler(true);

        let report = tokio::spawn(async move { scheduler.run_sweep("daemon").await })
            .await
            .expect("sweep task joins");

        assert!(report.is_some_and(|report| report.error.is_none()));
    }
}
