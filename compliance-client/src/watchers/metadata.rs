//! Metadata extraction watcher.
//!
//! Polls the combined status endpoint until structured metadata is
//! available, extraction is reported complete, or the job is judged stuck
//! or timed out. Partial metadata is actionable, so a single populated
//! field is already terminal.

use compliance_client_sdk::{ApiError, BackendClient, JobStatus, StatusSnapshot};
use tracing::debug;

use crate::config::EngineConfig;
use crate::poller::{PollConfig, PollOutcome, StatusPoller};

/// Terminal result of a metadata watch.
#[derive(Debug)]
pub enum MetadataOutcome {
    /// Extraction finished (or produced enough fields to act on).
    Ready {
        snapshot: StatusSnapshot,
        attempt: u32,
    },
    /// The stuck-backend heuristic fired: enough attempts elapsed with the
    /// job still claiming progress but zero fields populated. A genuinely
    /// slow extraction rarely recovers after that point, so the watcher
    /// stops early and surfaces a degraded result.
    Stuck {
        attempt: u32,
        last: Option<StatusSnapshot>,
    },
    /// The hard attempt ceiling elapsed without a terminal condition.
    TimedOut {
        attempts: u32,
        last: Option<StatusSnapshot>,
    },
    /// Polling itself failed (non-404 errors beyond the retry budget).
    Failed { error: ApiError },
    /// A newer cycle superseded this one.
    Cancelled,
}

/// Whether a status snapshot means extraction needs no further polling.
///
/// Any of: extraction reported completed, overall status completed,
/// numeric progress at 100, or at least one metadata field populated.
pub fn extraction_finished(snapshot: &StatusSnapshot) -> bool {
    snapshot.metadata_extraction == JobStatus::Completed
        || snapshot.status == JobStatus::Completed
        || snapshot.progress_percent.is_some_and(|p| p >= 100.0)
        || snapshot.metadata.has_any_field()
}

/// Empty-but-allegedly-running shape that the stuck heuristic watches for.
fn looks_stalled(snapshot: &StatusSnapshot) -> bool {
    !snapshot.metadata.has_any_field()
        && matches!(
            snapshot.status,
            JobStatus::Pending | JobStatus::Processing | JobStatus::Unknown
        )
}

/// Poll document status until extraction reaches a terminal outcome.
///
/// The terminal predicate is evaluated before the stuck heuristic on every
/// tick, so a tick that finally delivers a field can never be classified
/// as stuck.
pub async fn watch_metadata(
    client: &dyn BackendClient,
    poller: &StatusPoller,
    config: &EngineConfig,
    document_id: &str,
) -> MetadataOutcome {
    let stuck_after = config.metadata_stuck_after;
    let outcome = poller
        .run(
            PollConfig {
                interval: config.metadata_poll_interval,
                max_attempts: Some(config.metadata_max_attempts),
                error_budget: config.transient_error_budget,
            },
            |_| client.document_status(document_id),
            |attempt, snapshot: &StatusSnapshot| {
                extraction_finished(snapshot)
                    || (attempt >= stuck_after && looks_stalled(snapshot))
            },
        )
        .await;

    match outcome {
        PollOutcome::Terminal { value, attempt } => {
            if extraction_finished(&value) {
                debug!(document_id, attempt, "metadata extraction finished");
                MetadataOutcome::Ready {
                    snapshot: value,
                    attempt,
                }
            } else {
                debug!(document_id, attempt, "metadata extraction judged stuck");
                MetadataOutcome::Stuck {
                    attempt,
                    last: Some(value),
                }
            }
        }
        PollOutcome::Timeout { attempts, last } => MetadataOutcome::TimedOut { attempts, last },
        PollOutcome::Failed { error, .. } => MetadataOutcome::Failed { error },
        PollOutcome::Cancelled => MetadataOutcome::Cancelled,
    }
}
