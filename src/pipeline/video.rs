//! Video stage group: acquisition, transcription and on-screen text.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    identifier::RunIdentifier,
    model::{
        MediaKind, MediaReference, OnScreenText, SkipReason, StageOutcome, TextEntry, Transcript,
        TranscriptText, VideoResult,
    },
};
use crate::util::error::StageError;

pub(crate) mod providers;

pub(crate) const NO_AUDIO_TRACK: &str = "no audio track";

#[async_trait]
pub trait AcquireStage: Send + Sync {
    /// Downloads `url` and stores its media under `id`.
    async fn acquire(&self, url: &str, id: &RunIdentifier)
    -> Result<MediaReference, StageError>;
}

#[async_trait]
pub trait TranscribeStage: Send + Sync {
    async fn transcribe(&self, media: &MediaReference) -> Result<TranscriptText, StageError>;
}

#[async_trait]
pub trait OcrStage: Send + Sync {
    async fn extract(&self, media: &MediaReference) -> Result<Vec<TextEntry>, StageError>;
}

/// Acquisition plus the two optional text sources.
#[derive(Clone)]
pub struct VideoStageGroup {
    acquire: Arc<dyn AcquireStage>,
    transcribe: Option<Arc<dyn TranscribeStage>>,
    ocr: Option<Arc<dyn OcrStage>>,
}

impl VideoStageGroup {
    #[must_use]
    pub fn new(
        acquire: Arc<dyn AcquireStage>,
        transcribe: Option<Arc<dyn TranscribeStage>>,
        ocr: Option<Arc<dyn OcrStage>>,
    ) -> Self {
        Self {
            acquire,
            transcribe,
            ocr,
        }
    }

    pub(crate) async fn acquire(
        &self,
        url: &str,
        id: &RunIdentifier,
    ) -> Result<MediaReference, StageError> {
        let media = self.acquire.acquire(url, id).await?;
        if media.files.is_empty() {
            return Err(StageError::NotFound(format!("no media files for {id}")));
        }
        Ok(media)
    }

    /// Transcription never fails the run; the outcome says what happened.
    pub(crate) async fn transcribe(&self, media: &MediaReference) -> (Transcript, StageOutcome) {
        if media.kind == MediaKind::Carousel {
            debug!("carousel media has no audio, skipping transcription");
            return (
                Transcript::failed(NO_AUDIO_TRACK),
                StageOutcome::failed(NO_AUDIO_TRACK),
            );
        }
        let Some(transcriber) = &self.transcribe else {
            return (
                Transcript::not_run(),
                StageOutcome::skipped(SkipReason::Unconfigured),
            );
        };

        match transcriber.transcribe(media).await {
            Ok(text) if text.text.trim().is_empty() => {
                let error = "transcription returned no text";
                (Transcript::failed(error), StageOutcome::failed(error))
            }
            Ok(text) => {
                let detail = format!("{} chars", text.text.chars().count());
                (
                    Transcript::from_text(text),
                    StageOutcome::succeeded().with_detail(detail),
                )
            }
            Err(error) => {
                warn!(error = %error, "transcription failed, continuing without audio text");
                (Transcript::failed(&error), StageOutcome::from(&error))
            }
        }
    }

    /// On-screen text extraction never fails the run either.
    pub(crate) async fn read_screen(&self, media: &MediaReference) -> (OnScreenText, StageOutcome) {
        let Some(ocr) = &self.ocr else {
            return (
                OnScreenText::not_run(),
                StageOutcome::skipped(SkipReason::Unconfigured),
            );
        };

        match ocr.extract(media).await {
            Ok(entries) if entries.is_empty() => {
                let error = "no on-screen text found";
                (OnScreenText::failed(error), StageOutcome::failed(error))
            }
            Ok(entries) => {
                let detail = format!("{} text entries", entries.len());
                (
                    OnScreenText::from_entries(entries),
                    StageOutcome::succeeded().with_detail(detail),
                )
            }
            Err(error) => {
                warn!(error = %error, "on-screen text extraction failed, continuing");
                (OnScreenText::failed(&error), StageOutcome::from(&error))
            }
        }
    }
}

/// Joins every text source into the single document analysis reads.
///
/// Audio first, then one `Frame:` line per entry (a single `Images:` line
/// for carousels), then the caption when requested.
#[must_use]
pub fn combine(video: &VideoResult, include_caption: bool) -> String {
    let mut lines = Vec::new();

    let audio = video.transcript.text.trim();
    if video.transcript.ok && !audio.is_empty() {
        lines.push(format!("Audio: {audio}"));
    }

    if video.on_screen_text.ok {
        let texts = video
            .on_screen_text
            .entries
            .iter()
            .map(|entry| entry.text.trim())
            .filter(|text| !text.is_empty());
        match video.media_reference.kind {
            MediaKind::Video => lines.extend(texts.map(|text| format!("Frame: {text}"))),
            MediaKind::Carousel => {
                let joined = texts.collect::<Vec<_>>().join(" ");
                if !joined.is_empty() {
                    lines.push(format!("Images: {joined}"));
                }
            }
        }
    }

    if include_caption {
        if let Some(caption) = video
            .media_reference
            .metadata
            .description
            .as_deref()
            .map(str::trim)
            .filter(|caption| !caption.is_empty())
        {
            lines.push(format!("Caption: {caption}"));
        }
    }

    lines.join("\n")
}
