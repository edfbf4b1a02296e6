//! In-process artifact store for tests and `--no-cache` style runs.
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    pipeline::{
        cache::{ArtifactStore, ExistenceCache},
        identifier::RunIdentifier,
        model::{LocationRecord, MediaRecord, VideoResult},
    },
    util::error::StageError,
};

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    media: Mutex<HashMap<RunIdentifier, MediaRecord>>,
    video_results: Mutex<HashMap<RunIdentifier, VideoResult>>,
    locations: Mutex<HashMap<RunIdentifier, LocationRecord>>,
}

impl MemoryArtifactStore {
    /// Number of stored artifacts of each kind: media, video results,
    /// location records.
    pub async fn counts(&self) -> (usize, usize, usize) {
        (
            self.media.lock().await.len(),
            self.video_results.lock().await.len(),
            self.locations.lock().await.len(),
        )
    }
}

#[async_trait]
impl ExistenceCache for MemoryArtifactStore {
    async fn has_media(&self, id: &RunIdentifier) -> bool {
        self.media.lock().await.contains_key(id)
    }

    async fn has_video_result(&self, id: &RunIdentifier) -> bool {
        self.video_results.lock().await.contains_key(id)
    }

    async fn has_location_result(&self, id: &RunIdentifier) -> bool {
        self.locations.lock().await.contains_key(id)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn load_media(&self, id: &RunIdentifier) -> Result<Option<MediaRecord>, StageError> {
        Ok(self.media.lock().await.get(id).cloned())
    }

    async fn save_media(&self, record: &MediaRecord) -> Result<(), StageError> {
        self.media
            .lock()
            .await
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    async fn load_video_result(
        &self,
        id: &RunIdentifier,
    ) -> Result<Option<VideoResult>, StageError> {
        Ok(self.video_results.lock().await.get(id).cloned())
    }

    async fn save_video_result(&self, result: &VideoResult) -> Result<(), StageError> {
        self.video_results
            .lock()
            .await
            .insert(result.identifier.clone(), result.clone());
        Ok(())
    }

    async fn load_location(
        &self,
        id: &RunIdentifier,
    ) -> Result<Option<LocationRecord>, StageError> {
        Ok(self.locations.lock().await.get(id).cloned())
    }

    async fn save_location(&self, record: &LocationRecord) -> Result<(), StageError> {
        self.locations
            .lock()
            .await
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }
}
