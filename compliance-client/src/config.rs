//! Engine configuration.
//!
//! The polling cadences and the stuck-backend threshold are heuristics, not
//! backend contract, so all of them are plain configuration with the
//! production defaults below. Tests run the same code paths with
//! millisecond intervals.

use std::time::Duration;

/// Tunables for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between metadata status polls.
    pub metadata_poll_interval: Duration,
    /// Hard ceiling on metadata polls before giving up with a timeout.
    pub metadata_max_attempts: u32,
    /// Attempt count after which an extraction that has produced zero
    /// fields is declared stuck (early exit, before the hard ceiling).
    pub metadata_stuck_after: u32,
    /// Delay between compliance progress polls. Analyses legitimately run
    /// for many minutes, so there is no attempt ceiling on this loop.
    pub analysis_poll_interval: Duration,
    /// Extra attempts allowed after a non-404 fetch error before the poll
    /// is abandoned.
    pub transient_error_budget: u32,
    /// When set, AI-suggested standards are copied into the selection if
    /// the user has not picked any yet.
    pub auto_select_suggested: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata_poll_interval: Duration::from_secs(2),
            metadata_max_attempts: 30,
            metadata_stuck_after: 15,
            analysis_poll_interval: Duration::from_secs(3),
            transient_error_budget: 2,
            auto_select_suggested: false,
        }
    }
}
