//! Concrete video collaborators: yt-dlp, a whisper-compatible server and
//! Google Vision over sampled frames.
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{AcquireStage, OcrStage, TranscribeStage};
use crate::{
    clients::{FrameSampler, TranscriptionClient, VisionClient, YtDlpDownloader},
    pipeline::{
        identifier::RunIdentifier,
        model::{MediaKind, MediaReference, TextEntry, TranscriptText},
    },
    util::{error::StageError, retry::CallPolicy},
};

pub(crate) struct YtDlpAcquireStage {
    downloader: YtDlpDownloader,
    policy: CallPolicy,
}

impl YtDlpAcquireStage {
    pub(crate) fn new(downloader: YtDlpDownloader, policy: CallPolicy) -> Self {
        Self { downloader, policy }
    }
}

#[async_trait]
impl AcquireStage for YtDlpAcquireStage {
    async fn acquire(
        &self,
        url: &str,
        id: &RunIdentifier,
    ) -> Result<MediaReference, StageError> {
        let downloader = &self.downloader;
        self.policy
            .call("yt-dlp", || downloader.download(url, id))
            .await
    }
}

pub(crate) struct WhisperTranscribeStage {
    client: TranscriptionClient,
    policy: CallPolicy,
}

impl WhisperTranscribeStage {
    pub(crate) fn new(client: TranscriptionClient, policy: CallPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl TranscribeStage for WhisperTranscribeStage {
    async fn transcribe(&self, media: &MediaReference) -> Result<TranscriptText, StageError> {
        let file = primary_file(media)?;
        let client = &self.client;
        self.policy
            .call("transcription", || client.transcribe(file))
            .await
    }
}

/// Frame sampling plus Vision text detection for videos; carousel images
/// are sent as they are.
pub(crate) struct VisionOcrStage {
    client: VisionClient,
    sampler: FrameSampler,
    policy: CallPolicy,
}

impl VisionOcrStage {
    pub(crate) fn new(client: VisionClient, sampler: FrameSampler, policy: CallPolicy) -> Self {
        Self {
            client,
            sampler,
            policy,
        }
    }

    async fn detect(&self, image: &[u8]) -> Result<Option<String>, StageError> {
        let client = &self.client;
        self.policy
            .call("vision", || client.detect_text(image))
            .await
    }

    async fn read_frames(&self, media: &MediaReference) -> Result<Vec<TextEntry>, StageError> {
        let video = primary_file(media)?;
        let timestamps = self
            .sampler
            .timestamps(video, media.metadata.duration_secs)
            .await;
        debug!(frames = timestamps.len(), "sampling frames for text");

        let mut entries = Vec::new();
        let mut extracted = 0_usize;
        let mut last_error = None;
        for timestamp in timestamps {
            let frame = match self.sampler.extract_frame(video, timestamp).await {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(timestamp, error = %format!("{error:#}"), "frame extraction failed");
                    last_error = Some(StageError::provider("ffmpeg", &error));
                    continue;
                }
            };
            extracted += 1;
            if let Some(text) = self.detect(&frame).await? {
                entries.push(TextEntry { timestamp, text });
            }
        }

        match last_error {
            Some(error) if extracted == 0 => Err(error),
            _ => Ok(entries),
        }
    }

    async fn read_images(&self, media: &MediaReference) -> Result<Vec<TextEntry>, StageError> {
        let mut entries = Vec::new();
        for (index, path) in media.files.iter().enumerate() {
            let image = tokio::fs::read(path)
                .await
                .map_err(|error| StageError::Io(format!("{}: {error}", path.display())))?;
            if let Some(text) = self.detect(&image).await? {
                #[allow(clippy::cast_precision_loss)]
                let timestamp = (index + 1) as f64;
                entries.push(TextEntry { timestamp, text });
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl OcrStage for VisionOcrStage {
    async fn extract(&self, media: &MediaReference) -> Result<Vec<TextEntry>, StageError> {
        match media.kind {
            MediaKind::Video => self.read_frames(media).await,
            MediaKind::Carousel => self.read_images(media).await,
        }
    }
}

fn primary_file(media: &MediaReference) -> Result<&Path, StageError> {
    media
        .files
        .first()
        .map(std::path::PathBuf::as_path)
        .ok_or_else(|| StageError::NotFound("media reference has no files".into()))
}
