mod batch;
mod error;
mod materializer;
pub(crate) mod models;
mod output;
mod recover;
mod retrieve;
mod store;
mod traversal;

pub use batch::{BatchOrchestrator, BatchStats};
pub use error::{HarvestError, HarvestResult};
pub use materializer::{materialize, MaterializeOutcome};
pub use models::{
    derive_target_id, item_label, Checkpoint, Comment, CompletedTarget, CountBound, CreatorProfile,
    DownloadOutcome, EngagementCounts, ItemMetadata, ItemRecord, MediaLocations, Target,
    TargetRunRecord, TargetSummary,
};
pub use output::RecordWriter;
pub use recover::{SessionRecovery, TargetOutcome};
pub use retrieve::Retriever;
pub use store::{HarvestStore, HarvestStoreBuilder, ProgressStore};
pub use traversal::{TargetTraversal, TraversalContext, TraversalPhase};
