pub mod browser;
pub mod config;
pub mod error;
pub mod harvest;

pub use config::{
    load_browser_config, load_harvest_config, BrowserConfig, ConfigBundle, HarvestConfig,
};
pub use error::{ConfigError, Result};
pub use harvest::{
    derive_target_id, BatchOrchestrator, BatchStats, Checkpoint, CompletedTarget, CountBound,
    HarvestError, HarvestResult, HarvestStore, HarvestStoreBuilder, ItemMetadata, ItemRecord,
    ProgressStore, RecordWriter, Retriever, SessionRecovery, Target, TargetOutcome,
    TargetRunRecord, TargetSummary, TargetTraversal, TraversalContext, TraversalPhase,
};
