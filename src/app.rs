use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use axum::Router;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::info;

use crate::{
    api,
    clients::{
        FrameSampler, GeminiClient, HttpEndpoint, NotionClient, PlacesClient,
        TranscriptionClient, VisionClient, YtDlpDownloader, gemini::GeminiConfig,
    },
    config::Config,
    observability::Telemetry,
    pipeline::{
        LocationStageGroup, OcrStage, PendingSource, PipelineOrchestrator, RecordSink,
        RunOptions, TranscribeStage, VideoStageGroup,
        location::providers::{GeminiAnalyzeStage, PlacesEnrichStage},
        pending::NotionPendingSource,
        persist::NotionRecordSink,
        video::providers::{VisionOcrStage, WhisperTranscribeStage, YtDlpAcquireStage},
    },
    scheduler::{Scheduler, cadence::DailyCadence, daemon::spawn_sweep_daemon},
    store::FsArtifactStore,
    util::retry::{CallPolicy, RetryConfig},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

/// Everything the binaries share: config, telemetry, the orchestrator and
/// the sweep scheduler.
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    pipeline: Arc<PipelineOrchestrator>,
    scheduler: Scheduler,
    started_at: Instant,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.registry.scheduler
    }

    pub(crate) fn pipeline(&self) -> Arc<PipelineOrchestrator> {
        Arc::clone(&self.registry.pipeline)
    }

    pub(crate) fn uptime_seconds(&self) -> u64 {
        self.registry.started_at.elapsed().as_secs()
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let telemetry = Telemetry::new()?;
        Self::with_telemetry(config, telemetry)
    }

    /// Same as [`ComponentRegistry::build`] with caller-provided telemetry.
    ///
    /// # Errors
    /// HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn with_telemetry(config: Config, telemetry: Telemetry) -> Result<Self> {
        let config = Arc::new(config);
        let pipeline = Arc::new(build_pipeline(&config, &telemetry)?);
        Ok(Self::from_parts(config, telemetry, pipeline))
    }

    /// Wires an already built orchestrator into the control plane.
    #[must_use]
    pub fn from_parts(
        config: Arc<Config>,
        telemetry: Telemetry,
        pipeline: Arc<PipelineOrchestrator>,
    ) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&pipeline), RunOptions::default());
        Self {
            config,
            telemetry,
            pipeline,
            scheduler,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn pipeline(&self) -> Arc<PipelineOrchestrator> {
        Arc::clone(&self.pipeline)
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Daily sweep schedule, or `None` when sweeps are disabled or there is
    /// nothing to sweep.
    pub(crate) fn sweep_cadence(&self) -> Option<DailyCadence> {
        if !self.config.sweep_enabled() || !self.scheduler.can_sweep() {
            return None;
        }
        DailyCadence::new(
            self.config.sweep_utc_offset_hours(),
            self.config.sweep_hour(),
            self.config.sweep_minute(),
        )
    }

    /// Starts the daily sweep daemon when a cadence applies.
    #[must_use]
    pub fn spawn_sweep_daemon(&self) -> Option<JoinHandle<()>> {
        let cadence = self.sweep_cadence()?;
        Some(spawn_sweep_daemon(self.scheduler.clone(), cadence))
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}

fn endpoint(base_url: &str, config: &Config, total_timeout: std::time::Duration) -> HttpEndpoint {
    HttpEndpoint {
        base_url: base_url.to_string(),
        connect_timeout: config.http_connect_timeout(),
        total_timeout,
    }
}

/// Builds every concrete collaborator from `config`. Optional providers
/// whose settings are absent stay disabled.
///
/// # Errors
/// Fails when a client cannot be constructed (bad base URL, TLS setup).
pub fn build_pipeline(config: &Config, telemetry: &Telemetry) -> Result<PipelineOrchestrator> {
    let metrics = Arc::clone(telemetry.metrics());
    let admission = Arc::new(Semaphore::new(config.provider_max_concurrency().get()));
    let policy = CallPolicy::new(
        RetryConfig::new(
            config.http_max_retries().max(1),
            config.http_backoff_base_ms(),
            config.http_backoff_cap_ms(),
        ),
        config.provider_timeout(),
        admission,
    )
    .with_retry_counter(metrics.retries_total.clone());
    let provider_timeout = config.provider_timeout();

    let acquire = Arc::new(YtDlpAcquireStage::new(
        YtDlpDownloader::new(config.ytdlp_path(), config.output_dir()),
        policy.with_timeout(config.download_timeout()),
    ));

    let transcribe: Option<Arc<dyn TranscribeStage>> = match config.transcription_base_url() {
        Some(base_url) => {
            let client = TranscriptionClient::new(&endpoint(
                base_url,
                config,
                config.transcription_timeout(),
            ))?;
            Some(Arc::new(WhisperTranscribeStage::new(
                client,
                policy.with_timeout(config.transcription_timeout()),
            )))
        }
        None => {
            info!("TRANSCRIPTION_BASE_URL not set, transcription disabled");
            None
        }
    };

    let ocr: Option<Arc<dyn OcrStage>> = match config.vision_api_key() {
        Some(api_key) => {
            let client = VisionClient::new(
                &endpoint(config.vision_base_url(), config, provider_timeout),
                api_key,
            )?;
            let sampler = FrameSampler::new(
                config.ffmpeg_path(),
                config.ffprobe_path(),
                config.frame_interval_secs(),
                config.max_frames(),
            );
            Some(Arc::new(VisionOcrStage::new(client, sampler, policy.clone())))
        }
        None => {
            info!("VISION_API_KEY not set, on-screen text extraction disabled");
            None
        }
    };

    let gemini = GeminiClient::new(GeminiConfig {
        endpoint: endpoint(config.gemini_base_url(), config, provider_timeout),
        api_key: config.gemini_api_key().to_string(),
        model: config.gemini_model().to_string(),
    })?;
    let places = PlacesClient::new(
        &endpoint(config.places_base_url(), config, provider_timeout),
        config.google_maps_api_key(),
    )?;

    let mut builder = PipelineOrchestrator::builder()
        .with_video_stages(VideoStageGroup::new(acquire, transcribe, ocr))
        .with_location_stages(LocationStageGroup::new(
            Arc::new(GeminiAnalyzeStage::new(gemini, policy.clone())),
            Arc::new(PlacesEnrichStage::new(places, policy.clone())),
        ))
        .with_artifacts(Arc::new(FsArtifactStore::new(config.output_dir())))
        .with_batch_concurrency(config.batch_concurrency())
        .with_metrics(metrics);

    match config.notion_api_key() {
        Some(api_key) => {
            let notion = NotionClient::new(
                &endpoint(config.notion_base_url(), config, provider_timeout),
                api_key,
            )
            .context("failed to build notion client")?;
            if let Some(database_id) = config.notion_places_db_id() {
                let sink: Arc<dyn RecordSink> = Arc::new(NotionRecordSink::new(
                    notion.clone(),
                    database_id,
                    policy.clone(),
                ));
                builder = builder.with_record_sink(sink);
            }
            if let Some(database_id) = config.notion_source_db_id() {
                let source: Arc<dyn PendingSource> =
                    Arc::new(NotionPendingSource::new(notion, database_id, policy));
                builder = builder.with_pending_source(source);
            }
        }
        None => info!("NOTION_API_KEY not set, persistence and pending sweeps disabled"),
    }

    info!(output_dir = %config.output_dir().display(), "pipeline assembled");
    builder.build().context("failed to assemble pipeline")
}
