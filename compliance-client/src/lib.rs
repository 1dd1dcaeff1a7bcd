// Engine configuration (polling intervals, heuristics thresholds)
pub mod config;

// Error taxonomy for workflow operations
pub mod error;

// Workflow state record and stage transitions
pub mod state;

// Append-only narration log
pub mod messages;

// Generic status polling primitive
pub mod poller;

// Metadata and analysis watchers
pub mod watchers;

// Workflow orchestration engine
pub mod engine;

// SQLite session persistence
pub mod database;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use engine::{EngineEvent, WorkflowEngine};
pub use error::WorkflowError;
pub use state::{Stage, WorkflowState};
