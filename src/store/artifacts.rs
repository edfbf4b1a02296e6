//! JSON artifacts on the local filesystem.
//!
//! Layout under the output directory: `{id}_metadata.json`,
//! `{id}_results.json` and `{id}_location.json`, next to the media files the
//! downloader wrote. Every write goes to a temporary file first and is
//! renamed into place, so a crashed run never leaves a half-written
//! artifact behind.
use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    pipeline::{
        cache::{ArtifactStore, ExistenceCache},
        identifier::RunIdentifier,
        model::{LocationRecord, MediaRecord, VideoResult},
    },
    util::error::StageError,
};

const METADATA_SUFFIX: &str = "metadata";
const RESULTS_SUFFIX: &str = "results";
const LOCATION_SUFFIX: &str = "location";

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &RunIdentifier, suffix: &str) -> PathBuf {
        self.root.join(format!("{id}_{suffix}.json"))
    }

    /// Fail-open existence check: unreadable artifacts count as missing.
    async fn readable<T: DeserializeOwned>(&self, id: &RunIdentifier, suffix: &str) -> Option<T> {
        let path = self.path_for(id, suffix);
        match read_json(&path).await {
            Ok(value) => value,
            Err(error) => {
                warn!(identifier = %id, path = %path.display(), error = %error, "ignoring unreadable artifact");
                None
            }
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StageError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(StageError::Io(format!("{}: {error}", path.display()))),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|error| StageError::Invalid(format!("{}: {error}", path.display())))
}

async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), StageError> {
    let io_error = |error: io::Error| StageError::Io(format!("{}: {error}", path.display()));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let body = serde_json::to_vec_pretty(value)
        .map_err(|error| StageError::Invalid(format!("{}: {error}", path.display())))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, body).await.map_err(io_error)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_error)?;
    debug!(path = %path.display(), "artifact written");
    Ok(())
}

async fn all_exist(files: &[PathBuf]) -> bool {
    if files.is_empty() {
        return false;
    }
    for file in files {
        match tokio::fs::try_exists(file).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(error) => {
                warn!(path = %file.display(), error = %error, "media existence check failed");
                return false;
            }
        }
    }
    true
}

#[async_trait]
impl ExistenceCache for FsArtifactStore {
    async fn has_media(&self, id: &RunIdentifier) -> bool {
        match self.readable::<MediaRecord>(id, METADATA_SUFFIX).await {
            Some(record) => all_exist(&record.media.files).await,
            None => false,
        }
    }

    async fn has_video_result(&self, id: &RunIdentifier) -> bool {
        self.readable::<VideoResult>(id, RESULTS_SUFFIX).await.is_some()
    }

    async fn has_location_result(&self, id: &RunIdentifier) -> bool {
        self.readable::<LocationRecord>(id, LOCATION_SUFFIX)
            .await
            .is_some()
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn load_media(&self, id: &RunIdentifier) -> Result<Option<MediaRecord>, StageError> {
        read_json(&self.path_for(id, METADATA_SUFFIX)).await
    }

    async fn save_media(&self, record: &MediaRecord) -> Result<(), StageError> {
        write_json(&self.path_for(&record.identifier, METADATA_SUFFIX), record).await
    }

    async fn load_video_result(
        &self,
        id: &RunIdentifier,
    ) -> Result<Option<VideoResult>, StageError> {
        read_json(&self.path_for(id, RESULTS_SUFFIX)).await
    }

    async fn save_video_result(&self, result: &VideoResult) -> Result<(), StageError> {
        write_json(&self.path_for(&result.identifier, RESULTS_SUFFIX), result).await
    }

    async fn load_location(
        &self,
        id: &RunIdentifier,
    ) -> Result<Option<LocationRecord>, StageError> {
        read_json(&self.path_for(id, LOCATION_SUFFIX)).await
    }

    async fn save_location(&self, record: &LocationRecord) -> Result<(), StageError> {
        write_json(&self.path_for(&record.identifier, LOCATION_SUFFIX), record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::{
        MediaKind, MediaMetadata, MediaReference, OnScreenText, PlaceCandidate, Transcript,
    };

    fn id() -> RunIdentifier {
        RunIdentifier::resolve("https://example.com/video/12345").expect("id")
    }

    fn media_record(root: &Path) -> MediaRecord {
        MediaRecord {
            identifier: id(),
            source_url: "https://example.com/video/12345".into(),
            media: MediaReference {
                kind: MediaKind::Video,
                files: vec![root.join("example_com_video_12345.mp4")],
                metadata: MediaMetadata {
                    title: Some("Ramen".into()),
                    ..MediaMetadata::default()
                },
            },
        }
    }

    #[tokio::test]
    async fn media_counts_only_when_files_are_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        let record = media_record(dir.path());

        assert!(!store.has_media(&id()).await);
        store.save_media(&record).await.expect("save");
        assert!(!store.has_media(&id()).await);

        std::fs::write(&record.media.files[0], b"video").expect("write");
        assert!(store.has_media(&id()).await);
        assert_eq!(store.load_media(&id()).await.expect("load"), Some(record));
        assert!(dir.path().join("example_com_video_12345_metadata.json").exists());
    }

    #[tokio::test]
    async fn video_result_is_written_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path().join("nested"));
        let result = VideoResult::new(
            id(),
            "https://example.com/video/12345",
            media_record(dir.path()).media,
            Transcript::failed("boom"),
            OnScreenText::not_run(),
        );

        store.save_video_result(&result).await.expect("save");

        assert!(store.has_video_result(&id()).await);
        let entries: Vec<_> = std::fs::read_dir(store.root())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec!["example_com_video_12345_results.json"]);
    }

    #[tokio::test]
    async fn corrupt_artifact_is_a_miss_for_checks_and_an_error_for_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        std::fs::write(
            dir.path().join("example_com_video_12345_location.json"),
            b"{not json",
        )
        .expect("write");

        assert!(!store.has_location_result(&id()).await);
        assert!(matches!(
            store.load_location(&id()).await,
            Err(StageError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn location_record_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        let record = LocationRecord {
            identifier: id(),
            source_url: "https://example.com/video/12345".into(),
            candidates: vec![PlaceCandidate::named("Ichiran")],
            dropped: Vec::new(),
        };

        store.save_location(&record).await.expect("save");
        assert_eq!(store.load_location(&id()).await.expect("load"), Some(record));
    }
}
