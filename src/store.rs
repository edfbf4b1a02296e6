//! Artifact persistence behind [`crate::pipeline::ArtifactStore`].
pub mod artifacts;
pub mod memory;

pub use artifacts::FsArtifactStore;
pub use memory::MemoryArtifactStore;
