//! In-memory collaborators for driving the orchestrator end to end.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use wandr_worker::{
    pipeline::{
        AcquireStage, AnalyzeStage, EnrichStage, LocationStageGroup, OcrStage, PendingSource,
        PipelineBuilder, PipelineOrchestrator, RecordSink, TranscribeStage, VideoStageGroup,
        identifier::RunIdentifier,
        model::{
            AnalysisHints, MediaKind, MediaMetadata, MediaReference, PendingUrl, PendingUrlBatch,
            PersistReceipt, PlaceCandidate, PlaceDetails, ProcessedStatus, TextEntry,
            TranscriptText,
        },
    },
    store::MemoryArtifactStore,
    util::error::StageError,
};

fn provider_error(provider: &'static str, message: &str) -> StageError {
    StageError::Provider {
        provider,
        message: message.to_string(),
    }
}

/// Acquires every URL except those containing one of `missing`.
#[derive(Default)]
pub struct FakeAcquire {
    pub kind: Option<MediaKind>,
    pub missing: Vec<&'static str>,
    pub calls: AtomicUsize,
}

impl FakeAcquire {
    pub fn carousel() -> Self {
        Self {
            kind: Some(MediaKind::Carousel),
            ..Self::default()
        }
    }

    pub fn missing(patterns: &[&'static str]) -> Self {
        Self {
            missing: patterns.to_vec(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcquireStage for FakeAcquire {
    async fn acquire(&self, url: &str, id: &RunIdentifier) -> Result<MediaReference, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.iter().any(|pattern| url.contains(pattern)) {
            return Err(provider_error("yt-dlp", "video unavailable"));
        }
        let kind = self.kind.unwrap_or(MediaKind::Video);
        let files = match kind {
            MediaKind::Video => vec![PathBuf::from(format!("results/{id}.mp4"))],
            MediaKind::Carousel => (1..=2)
                .map(|index| PathBuf::from(format!("results/{}.jpg", id.item(index))))
                .collect(),
        };
        Ok(MediaReference {
            kind,
            files,
            metadata: MediaMetadata {
                title: Some("weekend food crawl".into()),
                ..MediaMetadata::default()
            },
        })
    }
}

/// Transcription that always answers the same way.
pub struct FakeTranscribe(pub Result<String, StageError>);

impl FakeTranscribe {
    pub fn says(text: &str) -> Self {
        Self(Ok(text.to_string()))
    }

    pub fn fails() -> Self {
        Self(Err(provider_error("transcription", "server error")))
    }
}

#[async_trait]
impl TranscribeStage for FakeTranscribe {
    async fn transcribe(&self, _media: &MediaReference) -> Result<TranscriptText, StageError> {
        self.0.clone().map(|text| TranscriptText {
            text,
            language: Some("en".into()),
        })
    }
}

/// OCR that reads the same lines off every source.
pub struct FakeOcr(pub Result<Vec<&'static str>, StageError>);

impl FakeOcr {
    pub fn reads(lines: &[&'static str]) -> Self {
        Self(Ok(lines.to_vec()))
    }

    pub fn fails() -> Self {
        Self(Err(provider_error("vision", "quota exceeded")))
    }
}

#[async_trait]
impl OcrStage for FakeOcr {
    async fn extract(&self, _media: &MediaReference) -> Result<Vec<TextEntry>, StageError> {
        let lines = self.0.clone()?;
        Ok(lines
            .into_iter()
            .zip(1_u32..)
            .map(|(text, position)| TextEntry {
                timestamp: f64::from(position),
                text: text.to_string(),
            })
            .collect())
    }
}

/// Finds every known place name mentioned in the text.
pub struct FakeAnalyzer {
    pub known: Vec<&'static str>,
    /// Returned as-is whatever the text says, when set.
    pub fixed: Option<Vec<&'static str>>,
    pub calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn knowing(names: &[&'static str]) -> Self {
        Self {
            known: names.to_vec(),
            fixed: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(names: &[&'static str]) -> Self {
        Self {
            fixed: Some(names.to_vec()),
            ..Self::knowing(&[])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyzeStage for FakeAnalyzer {
    async fn analyze(
        &self,
        text: &str,
        _hints: &AnalysisHints,
    ) -> Result<Vec<PlaceCandidate>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.iter().map(|name| PlaceCandidate::named(*name)).collect());
        }
        Ok(self
            .known
            .iter()
            .filter(|name| text.contains(*name))
            .map(|name| PlaceCandidate::named(*name))
            .collect())
    }
}

/// Places lookup backed by a table; unknown names are not found and names
/// listed in `failing` error out.
#[derive(Default)]
pub struct FakePlaces {
    pub addresses: HashMap<&'static str, &'static str>,
    pub failing: Vec<&'static str>,
}

impl FakePlaces {
    pub fn with(addresses: &[(&'static str, &'static str)]) -> Self {
        Self {
            addresses: addresses.iter().copied().collect(),
            failing: Vec::new(),
        }
    }

    pub fn failing_on(mut self, name: &'static str) -> Self {
        self.failing.push(name);
        self
    }
}

#[async_trait]
impl EnrichStage for FakePlaces {
    async fn enrich(&self, name: &str, _hint: &str) -> Result<PlaceDetails, StageError> {
        if self.failing.iter().any(|failing| *failing == name) {
            return Err(provider_error("places", "backend unavailable"));
        }
        Ok(match self.addresses.get(name) {
            Some(address) => PlaceDetails {
                address: Some((*address).to_string()),
                hours: None,
                website: None,
                map_link: Some(format!("https://maps.google.com/maps/search/{name}")),
                found: true,
            },
            None => PlaceDetails::not_found(),
        })
    }
}

/// Record sink keyed by `(name, source_url)`, like the real duplicate check.
#[derive(Default)]
pub struct FakeSink {
    records: Mutex<HashMap<(String, String), String>>,
}

impl FakeSink {
    pub fn len(&self) -> usize {
        self.records.lock().expect("records").len()
    }
}

#[async_trait]
impl RecordSink for FakeSink {
    async fn persist(
        &self,
        candidate: &PlaceCandidate,
        source_url: &str,
    ) -> Result<PersistReceipt, StageError> {
        let mut records = self.records.lock().expect("records");
        let key = (candidate.name.clone(), source_url.to_string());
        if let Some(record_id) = records.get(&key) {
            return Ok(PersistReceipt {
                record_id: record_id.clone(),
                created: false,
            });
        }
        let record_id = format!("page-{}", records.len() + 1);
        records.insert(key, record_id.clone());
        Ok(PersistReceipt {
            record_id,
            created: true,
        })
    }
}

/// Pending source over a fixed list that remembers every status written.
pub struct FakeSource {
    items: Vec<PendingUrl>,
    pub marks: Mutex<Vec<(String, ProcessedStatus)>>,
    pub refuse_marks_for: Option<&'static str>,
}

impl FakeSource {
    pub fn with_urls(urls: &[&str]) -> Self {
        Self {
            items: urls
                .iter()
                .enumerate()
                .map(|(index, url)| PendingUrl {
                    source_url: (*url).to_string(),
                    source_record_id: format!("source-{index}"),
                })
                .collect(),
            marks: Mutex::new(Vec::new()),
            refuse_marks_for: None,
        }
    }

    pub fn marks(&self) -> Vec<(String, ProcessedStatus)> {
        let mut marks = self.marks.lock().expect("marks").clone();
        marks.sort_by(|a, b| a.0.cmp(&b.0));
        marks
    }
}

#[async_trait]
impl PendingSource for FakeSource {
    async fn pending(&self) -> Result<PendingUrlBatch, StageError> {
        Ok(self.items.clone())
    }

    async fn mark_processed(&self, id: &str, status: ProcessedStatus) -> Result<(), StageError> {
        if self.refuse_marks_for == Some(id) {
            return Err(StageError::unavailable("source database is read-only"));
        }
        self.marks
            .lock()
            .expect("marks")
            .push((id.to_string(), status));
        Ok(())
    }
}

/// Collaborators for one test; hand them to [`Harness::pipeline`] once set up.
pub struct Harness {
    pub acquire: Arc<FakeAcquire>,
    pub transcribe: Option<Arc<FakeTranscribe>>,
    pub ocr: Option<Arc<FakeOcr>>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub places: Arc<FakePlaces>,
    pub sink: Option<Arc<FakeSink>>,
    pub source: Option<Arc<FakeSource>>,
    pub artifacts: Arc<MemoryArtifactStore>,
}

impl Harness {
    /// A video that mentions Ichiran in its audio and Blue Bottle on screen;
    /// both places resolve.
    pub fn ramen_video() -> Self {
        Self {
            acquire: Arc::new(FakeAcquire::default()),
            transcribe: Some(Arc::new(FakeTranscribe::says(
                "we started the night at Ichiran",
            ))),
            ocr: Some(Arc::new(FakeOcr::reads(&["Blue Bottle"]))),
            analyzer: Arc::new(FakeAnalyzer::knowing(&["Ichiran", "Blue Bottle"])),
            places: Arc::new(FakePlaces::with(&[
                ("Ichiran", "1-22-7 Jinnan, Shibuya"),
                ("Blue Bottle", "3-13-14 Minamiaoyama"),
            ])),
            sink: Some(Arc::new(FakeSink::default())),
            source: None,
            artifacts: Arc::new(MemoryArtifactStore::default()),
        }
    }

    pub fn pipeline(&self) -> PipelineOrchestrator {
        self.builder().build().expect("pipeline builds")
    }

    pub fn pipeline_with_concurrency(&self, concurrency: NonZeroUsize) -> PipelineOrchestrator {
        self.builder()
            .with_batch_concurrency(concurrency)
            .build()
            .expect("pipeline builds")
    }

    fn builder(&self) -> PipelineBuilder {
        let transcribe = self
            .transcribe
            .clone()
            .map(|stage| stage as Arc<dyn TranscribeStage>);
        let ocr = self.ocr.clone().map(|stage| stage as Arc<dyn OcrStage>);
        let mut builder = PipelineOrchestrator::builder()
            .with_video_stages(VideoStageGroup::new(
                self.acquire.clone(),
                transcribe,
                ocr,
            ))
            .with_location_stages(LocationStageGroup::new(
                self.analyzer.clone(),
                self.places.clone(),
            ))
            .with_artifacts(self.artifacts.clone());
        if let Some(sink) = &self.sink {
            builder = builder.with_record_sink(sink.clone());
        }
        if let Some(source) = &self.source {
            builder = builder.with_pending_source(source.clone());
        }
        builder
    }
}
