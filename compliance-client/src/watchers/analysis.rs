//! Compliance analysis progress watcher.
//!
//! Analyses legitimately run for many minutes, so this loop has no attempt
//! ceiling and relies on terminal backend states instead of a timeout. Each
//! PROCESSING tick hands the freshly fetched snapshot to the caller
//! wholesale; snapshots are never merged field-by-field across ticks.

use compliance_client_sdk::{AnalysisProgress, ApiError, BackendClient, JobStatus};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::poller::{PollConfig, PollOutcome, StatusPoller};

/// Terminal result of an analysis watch.
#[derive(Debug)]
pub enum AnalysisOutcome {
    /// Backend reported COMPLETED.
    Finished { progress: AnalysisProgress },
    /// Backend reported COMPLETED_WITH_ERRORS; results are usable but the
    /// narration must communicate degraded confidence.
    FinishedWithErrors { progress: AnalysisProgress },
    /// Backend reported FAILED; message passed through verbatim.
    JobFailed { progress: AnalysisProgress },
    /// Backend reported FRAMEWORK_SELECTED: the framework is stored but the
    /// compliance engine has not started. The caller must issue a
    /// start-compliance request and restart polling only if that request
    /// itself succeeds.
    NeedsComplianceStart,
    /// Polling itself failed (non-404 errors beyond the retry budget).
    Failed { error: ApiError },
    /// A newer cycle superseded this one.
    Cancelled,
}

fn is_watch_terminal(status: JobStatus) -> bool {
    status.is_analysis_terminal() || status == JobStatus::FrameworkSelected
}

/// Poll analysis progress until a terminal state, reporting every
/// intermediate snapshot through `on_progress`.
///
/// A 404 from the progress endpoint means the job is still warming up;
/// it is reported as a synthetic zero-progress snapshot rather than an
/// error so the UI never appears frozen.
pub async fn watch_analysis<F>(
    client: &dyn BackendClient,
    poller: &StatusPoller,
    config: &EngineConfig,
    document_id: &str,
    mut on_progress: F,
) -> AnalysisOutcome
where
    F: FnMut(&AnalysisProgress),
{
    let outcome = poller
        .run(
            PollConfig {
                interval: config.analysis_poll_interval,
                max_attempts: None,
                error_budget: config.transient_error_budget,
            },
            |_| async {
                match client.analysis_progress(document_id).await {
                    Err(error) if error.is_not_found() => {
                        Ok(AnalysisProgress::synthetic("Analysis is starting..."))
                    }
                    other => other,
                }
            },
            |_, progress: &AnalysisProgress| {
                if is_watch_terminal(progress.status) {
                    return true;
                }
                on_progress(progress);
                false
            },
        )
        .await;

    match outcome {
        PollOutcome::Terminal { value, attempt } => {
            debug!(document_id, attempt, status = ?value.status, "analysis poll terminal");
            match value.status {
                JobStatus::Completed => AnalysisOutcome::Finished { progress: value },
                JobStatus::CompletedWithErrors => {
                    AnalysisOutcome::FinishedWithErrors { progress: value }
                }
                JobStatus::Failed => AnalysisOutcome::JobFailed { progress: value },
                JobStatus::FrameworkSelected => AnalysisOutcome::NeedsComplianceStart,
                other => {
                    // unreachable with the predicate above; treat defensively
                    warn!(document_id, status = ?other, "unexpected terminal status");
                    AnalysisOutcome::JobFailed { progress: value }
                }
            }
        }
        // no attempt ceiling is configured, so a timeout cannot occur
        PollOutcome::Timeout { .. } => AnalysisOutcome::Cancelled,
        PollOutcome::Failed { error, .. } => AnalysisOutcome::Failed { error },
        PollOutcome::Cancelled => AnalysisOutcome::Cancelled,
    }
}
