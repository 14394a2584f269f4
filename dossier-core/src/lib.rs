//! # Dossier Core
//!
//! Research job lifecycle for Dossier: the data model, the job store, the
//! execution engine that drives jobs against a remote deep-research service,
//! cost accounting and configuration.

pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod persistence;
pub mod remote;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{DossierConfig, load_config};
pub use cost::{ModelPrice, PriceTable, cost};
pub use engine::{EngineConfig, ExecutionEngine, JobEvents, JobHandle, ProgressEvent, ProgressKind};
pub use error::{DossierError, ErrorKind, Result};
pub use lifecycle::ResearchPatch;
pub use persistence::{FileStorage, MemoryStorage, SnapshotStorage};
pub use remote::{
    MockPromptRefiner, MockResearchService, OpenAiClient, PromptRefiner, ResearchService,
};
pub use store::{JobStore, Settings, SharedStore};
pub use types::{
    PromptConfig, Research, ResearchCost, ResearchDepth, ResearchResult, ResearchStatus, Source,
    TokenUsage,
};
