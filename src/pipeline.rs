//! URL から場所レコードまでのパイプライン。
//!
//! Stage groups sit behind narrow collaborator traits; the orchestrator
//! sequences them, applies the artifact cache and assembles one
//! [`PipelineRunResult`] per URL.
pub(crate) mod assemble;
pub mod batch;
pub mod cache;
pub(crate) mod executor;
pub mod identifier;
pub mod location;
pub mod model;
pub mod orchestrator;
pub mod pending;
pub mod persist;
pub mod video;

pub use batch::{BatchItemResult, BatchReport, BatchSummary};
pub use cache::{ArtifactStore, ExistenceCache};
pub use identifier::{ResolveError, RunIdentifier};
pub use location::{AnalyzeStage, EnrichStage, LocationStageGroup};
pub use model::{PipelineRunResult, RunMode, RunOptions, Stage, StageOutcome};
pub use orchestrator::{BuildError, PipelineBuilder, PipelineOrchestrator};
pub use pending::PendingSource;
pub use persist::RecordSink;
pub use video::{AcquireStage, OcrStage, TranscribeStage, VideoStageGroup};
