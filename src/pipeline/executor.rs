use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{
    assemble::RunRecorder,
    cache::ArtifactStore,
    identifier::RunIdentifier,
    model::{
        AnalysisHints, DroppedCandidate, LocationRecord, MediaRecord, MediaReference,
        OnScreenText, PersistedRecord, PlaceCandidate, RunMode, RunOptions, SkipReason, Stage,
        StageOutcome, Transcript, VideoResult,
    },
    orchestrator::PipelineOrchestrator,
    video::combine,
};
use crate::util::{error::StageError, idempotency::candidate_key, text};

const TEXT_STAGES: [Stage; 2] = [Stage::Transcribe, Stage::Ocr];
const LOCATION_STAGES: [Stage; 2] = [Stage::Analyze, Stage::Enrich];

/// パイプラインステージ実行のヘルパー
///
/// Runs the stages of one run in order against a recorder. Every method
/// records its own outcomes; none of them returns an error.
pub(crate) struct StageExecutor<'a> {
    orchestrator: &'a PipelineOrchestrator,
    id: &'a RunIdentifier,
    url: &'a str,
    options: &'a RunOptions,
}

impl<'a> StageExecutor<'a> {
    pub(crate) fn new(
        orchestrator: &'a PipelineOrchestrator,
        id: &'a RunIdentifier,
        url: &'a str,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            orchestrator,
            id,
            url,
            options,
        }
    }

    fn artifacts(&self) -> &dyn ArtifactStore {
        self.orchestrator.artifacts.as_ref()
    }

    /// Acquire, transcribe and OCR, or their cached equivalent.
    ///
    /// Returns `None` when the run cannot continue.
    pub(crate) async fn execute_video_stages(
        &self,
        run: &mut RunRecorder,
    ) -> Option<VideoResult> {
        if self.options.mode == RunMode::LocationOnly {
            return match self.cached_video().await {
                Some(video) => {
                    run.record(
                        Stage::Acquire,
                        StageOutcome::skipped(SkipReason::Cached)
                            .with_detail("loaded cached video result"),
                    );
                    run.record_all(&TEXT_STAGES, &StageOutcome::skipped(SkipReason::Cached));
                    Some(video)
                }
                None => {
                    run.record(
                        Stage::Acquire,
                        StageOutcome::failed(StageError::NotFound(
                            "location-only run requires a cached video result".to_string(),
                        )),
                    );
                    None
                }
            };
        }

        if self.options.use_cache {
            if let Some(video) = self.cached_video().await {
                info!("reusing cached video result");
                run.record(
                    Stage::Acquire,
                    StageOutcome::skipped(SkipReason::Cached)
                        .with_detail("loaded cached video result"),
                );
                run.record_all(&TEXT_STAGES, &StageOutcome::skipped(SkipReason::Cached));
                return Some(video);
            }
        }

        let media = self.execute_acquire_stage(run).await?;
        let video_stages = &self.orchestrator.stages.video;

        let (transcript, outcome) = if self.options.skip_transcription {
            (
                Transcript::not_run(),
                StageOutcome::skipped(SkipReason::Mode),
            )
        } else {
            video_stages.transcribe(&media).await
        };
        run.record(Stage::Transcribe, outcome);

        let (on_screen, outcome) = if self.options.skip_ocr {
            (
                OnScreenText::not_run(),
                StageOutcome::skipped(SkipReason::Mode),
            )
        } else {
            video_stages.read_screen(&media).await
        };
        run.record(Stage::Ocr, outcome);

        let video = VideoResult::new(self.id.clone(), self.url, media, transcript, on_screen);
        if self.options.runs_all_text_sources() {
            if let Err(error) = self.artifacts().save_video_result(&video).await {
                warn!(error = %error, "failed to save video result");
            }
        }
        Some(video)
    }

    async fn execute_acquire_stage(&self, run: &mut RunRecorder) -> Option<MediaReference> {
        if self.options.use_cache {
            if let Some(record) = self.cached_media().await {
                run.record(
                    Stage::Acquire,
                    StageOutcome::skipped(SkipReason::Cached).with_detail("media already on disk"),
                );
                return Some(record.media);
            }
        }

        match self.orchestrator.stages.video.acquire(self.url, self.id).await {
            Ok(media) => {
                let detail = format!("{:?} with {} file(s)", media.kind, media.files.len());
                let record = MediaRecord {
                    identifier: self.id.clone(),
                    source_url: self.url.to_string(),
                    media: media.clone(),
                };
                if let Err(error) = self.artifacts().save_media(&record).await {
                    warn!(error = %error, "failed to save media metadata record");
                }
                run.record(Stage::Acquire, StageOutcome::succeeded().with_detail(detail));
                Some(media)
            }
            Err(error) => {
                run.record(Stage::Acquire, StageOutcome::from(&error));
                None
            }
        }
    }

    /// Builds the analysis document. Always succeeds.
    pub(crate) fn execute_combine(&self, run: &mut RunRecorder, video: &VideoResult) -> String {
        let combined = combine(video, self.options.include_caption);
        debug!(
            preview = %text::preview(&combined, text::MAX_TEXT_PREVIEW_LENGTH),
            "combined text"
        );
        run.record(
            Stage::Combine,
            StageOutcome::succeeded().with_detail(format!("{} chars", combined.chars().count())),
        );
        combined
    }

    /// Analyze then enrich, or the cached location record.
    ///
    /// Returns the validated candidates; dropped ones go on the recorder.
    pub(crate) async fn execute_location_stages(
        &self,
        run: &mut RunRecorder,
        video: &VideoResult,
        combined: &str,
    ) -> Vec<PlaceCandidate> {
        if self.options.use_cache && self.options.mode != RunMode::LocationOnly {
            if let Some(record) = self.cached_location().await {
                info!(
                    candidates = record.candidates.len(),
                    "reusing cached location record"
                );
                run.record_all(&LOCATION_STAGES, &StageOutcome::skipped(SkipReason::Cached));
                run.add_dropped(record.dropped);
                return record.candidates;
            }
        }

        if combined.trim().is_empty() {
            run.record_all(
                &LOCATION_STAGES,
                &StageOutcome::skipped(SkipReason::EmptyInput),
            );
            return Vec::new();
        }

        let location = &self.orchestrator.stages.location;
        let hints = AnalysisHints {
            categories: self.options.categories.clone(),
            metadata: Some(video.media_reference.metadata.clone())
                .filter(|metadata| !metadata.is_empty()),
        };
        let candidates = match location.analyze(combined, &hints).await {
            Ok(candidates) => {
                run.record(
                    Stage::Analyze,
                    StageOutcome::succeeded()
                        .with_detail(format!("{} candidate(s)", candidates.len())),
                );
                candidates
            }
            Err(error) => {
                run.record(Stage::Analyze, StageOutcome::from(&error));
                run.record(Stage::Enrich, StageOutcome::skipped(SkipReason::EmptyInput));
                return Vec::new();
            }
        };

        if candidates.is_empty() {
            run.record(Stage::Enrich, StageOutcome::skipped(SkipReason::EmptyInput));
            self.save_location(Vec::new(), Vec::new()).await;
            return Vec::new();
        }

        let report = location.enrich_all(candidates).await;
        let outcome = report.outcome();
        let cacheable = outcome.ok;
        run.record(Stage::Enrich, outcome);
        if cacheable {
            self.save_location(report.validated.clone(), report.dropped.clone())
                .await;
        }
        run.add_dropped(report.dropped);
        report.validated
    }

    /// Sends each validated candidate to the record sink once.
    pub(crate) async fn execute_persist_stage(
        &self,
        run: &mut RunRecorder,
        candidates: &[PlaceCandidate],
    ) {
        if !self.options.persist {
            run.record(Stage::Persist, StageOutcome::skipped(SkipReason::Mode));
            return;
        }
        let Some(sink) = &self.orchestrator.stages.sink else {
            run.record(Stage::Persist, StageOutcome::skipped(SkipReason::Unconfigured));
            return;
        };
        if candidates.is_empty() {
            run.record(Stage::Persist, StageOutcome::skipped(SkipReason::EmptyInput));
            return;
        }

        let mut seen = HashSet::new();
        let mut created = 0_usize;
        let mut existing = 0_usize;
        let mut failures = Vec::new();

        for candidate in candidates {
            if !seen.insert(candidate_key(&candidate.name, candidate.address.as_deref())) {
                debug!(name = %candidate.name, "candidate already persisted in this run");
                continue;
            }
            match sink.persist(candidate, self.url).await {
                Ok(receipt) => {
                    if receipt.created {
                        created += 1;
                    } else {
                        existing += 1;
                    }
                    run.add_receipt(PersistedRecord {
                        record_id: receipt.record_id,
                        name: candidate.name.clone(),
                        created: receipt.created,
                    });
                }
                Err(error) => {
                    warn!(name = %candidate.name, error = %error, "failed to persist candidate");
                    failures.push(format!("{}: {error}", candidate.name));
                }
            }
        }

        let detail = format!("{created} created, {existing} existing");
        let outcome = if failures.is_empty() {
            StageOutcome::succeeded()
        } else {
            StageOutcome::failed(failures.join("; "))
        };
        run.record(Stage::Persist, outcome.with_detail(detail));
    }

    async fn cached_video(&self) -> Option<VideoResult> {
        if !self.artifacts().has_video_result(self.id).await {
            return None;
        }
        self.artifacts()
            .load_video_result(self.id)
            .await
            .unwrap_or_else(|error| {
                warn!(error = %error, "cached video result unreadable, treating as absent");
                None
            })
    }

    async fn cached_media(&self) -> Option<MediaRecord> {
        if !self.artifacts().has_media(self.id).await {
            return None;
        }
        self.artifacts()
            .load_media(self.id)
            .await
            .unwrap_or_else(|error| {
                warn!(error = %error, "cached media record unreadable, treating as absent");
                None
            })
    }

    async fn cached_location(&self) -> Option<LocationRecord> {
        if !self.artifacts().has_location_result(self.id).await {
            return None;
        }
        self.artifacts()
            .load_location(self.id)
            .await
            .unwrap_or_else(|error| {
                warn!(error = %error, "cached location record unreadable, treating as absent");
                None
            })
    }

    async fn save_location(
        &self,
        candidates: Vec<PlaceCandidate>,
        dropped: Vec<DroppedCandidate>,
    ) {
        // A record built from partial text would be reused by later full runs.
        if !self.options.runs_all_text_sources() {
            debug!("partial-text run, location record not cached");
            return;
        }
        let record = LocationRecord {
            identifier: self.id.clone(),
            source_url: self.url.to_string(),
            candidates,
            dropped,
        };
        if let Err(error) = self.artifacts().save_location(&record).await {
            warn!(error = %error, "failed to save location record");
        }
    }
}
