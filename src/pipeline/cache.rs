use async_trait::async_trait;

use super::{
    identifier::RunIdentifier,
    model::{LocationRecord, MediaRecord, VideoResult},
};
use crate::util::error::StageError;

/// Which artifacts already exist for an identifier.
///
/// Checks are pure reads. Implementations treat an indeterminate check
/// (permission errors, unreadable or corrupt artifacts) as a miss and log
/// it, so a broken cache can only cost recomputation.
#[async_trait]
pub trait ExistenceCache: Send + Sync {
    /// Metadata record and every media file it references are present.
    async fn has_media(&self, id: &RunIdentifier) -> bool;
    async fn has_video_result(&self, id: &RunIdentifier) -> bool;
    async fn has_location_result(&self, id: &RunIdentifier) -> bool;
}

/// Loads and saves the three artifacts a run produces.
///
/// `load_*` returns `Ok(None)` on a miss and `Err` only when an artifact
/// exists but cannot be read; the orchestrator treats both as absent.
#[async_trait]
pub trait ArtifactStore: ExistenceCache {
    async fn load_media(&self, id: &RunIdentifier) -> Result<Option<MediaRecord>, StageError>;
    async fn save_media(&self, record: &MediaRecord) -> Result<(), StageError>;

    async fn load_video_result(
        &self,
        id: &RunIdentifier,
    ) -> Result<Option<VideoResult>, StageError>;
    async fn save_video_result(&self, result: &VideoResult) -> Result<(), StageError>;

    async fn load_location(
        &self,
        id: &RunIdentifier,
    ) -> Result<Option<LocationRecord>, StageError>;
    async fn save_location(&self, record: &LocationRecord) -> Result<(), StageError>;
}
