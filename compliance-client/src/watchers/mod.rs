//! Watchers drive a single workflow stage to completion by polling the
//! backend until a terminal condition is met. Errors never cross the
//! watcher boundary as panics or results; every watcher returns a terminal
//! outcome enum so the engine has one uniform handling path.

mod analysis;
mod metadata;

pub use analysis::{watch_analysis, AnalysisOutcome};
pub use metadata::{extraction_finished, watch_metadata, MetadataOutcome};
