pub mod catalog;
pub mod checkpoint;
pub mod classifier;
pub mod entity;
pub mod error;
pub mod pipeline;
pub mod relations;
pub mod retry;
pub mod source;
pub mod storage;
pub mod tagger;

pub use catalog::{Catalog, ContentRule, PhraseIndex, StructureSignals};
pub use checkpoint::{CheckpointState, RunStatus, PHASE_EXTRACTION};
pub use classifier::{Classification, DocumentClassifier};
pub use entity::{EntitySpan, EntityType, SourceTier};
pub use error::{Error, Result};
pub use pipeline::{ExtractionPipeline, PipelineConfig, RunSummary};
pub use relations::{
    Evidence, InferenceConfig, RelationType, RelationshipInferencer, RelationshipRecord, SpanRef,
};
pub use retry::RetryPolicy;
pub use source::{JsonlSource, RawDocument};
pub use storage::{Storage, StorageCounts, StoredDocument};
pub use tagger::statistical::{NullModel, PredictedSpan, StatisticalModel};
pub use tagger::{ExtractionError, MultiTierTagger};
