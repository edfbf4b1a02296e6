//! Values that flow between pipeline stages and the run result handed back
//! to dispatch surfaces.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::RunIdentifier;
use crate::util::error::StageError;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Acquire,
    Transcribe,
    Ocr,
    Combine,
    Analyze,
    Enrich,
    Persist,
}

impl Stage {
    pub const ALL: [Self; 8] = [
        Self::Resolve,
        Self::Acquire,
        Self::Transcribe,
        Self::Ocr,
        Self::Combine,
        Self::Analyze,
        Self::Enrich,
        Self::Persist,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Acquire => "acquire",
            Self::Transcribe => "transcribe",
            Self::Ocr => "ocr",
            Self::Combine => "combine",
            Self::Analyze => "analyze",
            Self::Enrich => "enrich",
            Self::Persist => "persist",
        }
    }

    /// Stages whose failure makes the whole run count as failed.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(
            self,
            Self::Resolve | Self::Acquire | Self::Analyze | Self::Persist
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An artifact from an earlier run was reused.
    Cached,
    /// The run mode or options excluded the stage.
    Mode,
    /// The stage had nothing to work on.
    EmptyInput,
    /// No collaborator is configured for the stage.
    Unconfigured,
}

/// Result of one stage. A skipped stage is `ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageOutcome {
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            ok: true,
            skipped: None,
            error: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::succeeded()
        }
    }

    #[must_use]
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            ok: false,
            skipped: None,
            error: Some(error.to_string()),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Metrics label: `ok`, `skipped` or `failed`.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match (self.ok, self.skipped) {
            (false, _) => "failed",
            (true, Some(_)) => "skipped",
            (true, None) => "ok",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    /// A sequence of still images with no audio track.
    Carousel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl MediaMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.uploader.is_none()
            && self.duration_secs.is_none()
    }
}

/// Locally stored media for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaReference {
    pub kind: MediaKind,
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub metadata: MediaMetadata,
}

/// `{id}_metadata.json`: what acquisition produced and for which URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub identifier: RunIdentifier,
    pub source_url: String,
    pub media: MediaReference,
}

/// Raw output of a transcription collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Transcript {
    #[must_use]
    pub fn from_text(text: TranscriptText) -> Self {
        Self {
            text: text.text,
            language: text.language,
            ok: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            text: String::new(),
            language: None,
            ok: false,
            error: Some(error.to_string()),
        }
    }

    /// Placeholder for a transcription the caller chose not to run.
    #[must_use]
    pub fn not_run() -> Self {
        Self {
            text: String::new(),
            language: None,
            ok: false,
            error: None,
        }
    }
}

/// Text found on screen; `timestamp` is seconds into the video, or the
/// 1-based image index for carousels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEntry {
    pub timestamp: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnScreenText {
    pub entries: Vec<TextEntry>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OnScreenText {
    #[must_use]
    pub fn from_entries(entries: Vec<TextEntry>) -> Self {
        Self {
            entries,
            ok: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            entries: Vec::new(),
            ok: false,
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn not_run() -> Self {
        Self {
            entries: Vec::new(),
            ok: false,
            error: None,
        }
    }
}

/// Everything the video stages learned about one source. Written to
/// `{id}_results.json` and reused by later runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoResult {
    pub identifier: RunIdentifier,
    pub source_url: String,
    pub media_reference: MediaReference,
    pub transcript: Transcript,
    pub on_screen_text: OnScreenText,
    pub overall_ok: bool,
}

impl VideoResult {
    #[must_use]
    pub fn new(
        identifier: RunIdentifier,
        source_url: impl Into<String>,
        media_reference: MediaReference,
        transcript: Transcript,
        on_screen_text: OnScreenText,
    ) -> Self {
        let overall_ok = transcript.ok || on_screen_text.ok;
        Self {
            identifier,
            source_url: source_url.into(),
            media_reference,
            transcript,
            on_screen_text,
            overall_ok,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceCandidate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_link: Option<String>,
    #[serde(default)]
    pub is_popup: bool,
    #[serde(default)]
    pub visited: bool,
    #[serde(default)]
    pub validated: bool,
}

impl PlaceCandidate {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Disambiguating text sent along with the name to places lookup.
    #[must_use]
    pub fn context_hint(&self) -> String {
        self.address
            .as_deref()
            .or(self.neighborhood.as_deref())
            .unwrap_or_default()
            .to_string()
    }

    /// Merges a places lookup into the candidate. The looked-up address
    /// wins; hours and website only fill gaps.
    pub fn apply(&mut self, details: &PlaceDetails) {
        if let Some(address) = &details.address {
            self.address = Some(address.clone());
        }
        if self.hours.is_none() {
            self.hours.clone_from(&details.hours);
        }
        if self.website.is_none() {
            self.website.clone_from(&details.website);
        }
        if details.map_link.is_some() {
            self.map_link.clone_from(&details.map_link);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceDetails {
    pub address: Option<String>,
    pub hours: Option<String>,
    pub website: Option<String>,
    pub map_link: Option<String>,
    pub found: bool,
}

impl PlaceDetails {
    #[must_use]
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Context forwarded to analysis alongside the combined text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisHints {
    pub categories: Vec<String>,
    pub metadata: Option<MediaMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReceipt {
    pub record_id: String,
    /// `false` when the sink already held an equivalent record.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub record_id: String,
    pub name: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedCandidate {
    pub name: String,
    pub reason: String,
}

/// `{id}_location.json`: validated candidates and what was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub identifier: RunIdentifier,
    pub source_url: String,
    pub candidates: Vec<PlaceCandidate>,
    #[serde(default)]
    pub dropped: Vec<DroppedCandidate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Full,
    /// Stop after combining text; no analysis or persistence.
    VideoOnly,
    /// Reuse the cached video result and redo location extraction.
    LocationOnly,
}

impl RunMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::VideoOnly => "video_only",
            Self::LocationOnly => "location_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunOptions {
    pub mode: RunMode,
    pub skip_transcription: bool,
    pub skip_ocr: bool,
    pub include_caption: bool,
    pub persist: bool,
    pub use_cache: bool,
    pub categories: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Full,
            skip_transcription: false,
            skip_ocr: false,
            include_caption: false,
            persist: true,
            use_cache: true,
            categories: Vec::new(),
        }
    }
}

impl RunOptions {
    /// Video results are only cached when both text sources were attempted,
    /// so a later full run never inherits a deliberately partial result.
    #[must_use]
    pub fn runs_all_text_sources(&self) -> bool {
        !self.skip_transcription && !self.skip_ocr
    }
}

/// Summary of one run. Assembled progressively by the orchestrator and
/// never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunResult {
    pub identifier: Option<RunIdentifier>,
    pub source_url: String,
    pub mode: RunMode,
    pub stage_outcomes: BTreeMap<Stage, StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_result: Option<VideoResult>,
    pub candidates: Vec<PlaceCandidate>,
    pub dropped: Vec<DroppedCandidate>,
    pub persist_receipts: Vec<PersistedRecord>,
    pub persisted_record_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineRunResult {
    #[must_use]
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stage_outcomes.get(&stage)
    }

    /// `true` when no critical stage failed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.stage_outcomes
            .iter()
            .all(|(stage, outcome)| outcome.ok || !stage.is_critical())
    }

    /// First error recorded on a critical stage.
    #[must_use]
    pub fn first_error(&self) -> Option<String> {
        self.stage_outcomes
            .iter()
            .filter(|(stage, outcome)| stage.is_critical() && !outcome.ok)
            .find_map(|(stage, outcome)| {
                outcome
                    .error
                    .as_ref()
                    .map(|error| format!("{stage}: {error}"))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUrl {
    pub source_url: String,
    pub source_record_id: String,
}

pub type PendingUrlBatch = Vec<PendingUrl>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessedStatus {
    Completed,
    Failed,
}

impl ProcessedStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

impl From<&StageError> for StageOutcome {
    fn from(error: &StageError) -> Self {
        Self::failed(error)
    }
}
