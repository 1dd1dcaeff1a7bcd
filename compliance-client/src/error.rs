//! Error taxonomy for workflow operations.
//!
//! Watcher-internal failures never surface here directly; they are
//! converted into terminal watcher outcomes so the engine has one uniform
//! handling path. This type covers the user-facing entry points.

use compliance_client_sdk::ApiError;
use thiserror::Error;

use crate::state::Stage;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Analysis was requested without a framework or with an empty
    /// standards selection. Raised before any network call is made.
    #[error("analysis requires a framework and at least one selected standard")]
    MissingAnalysisParameters,

    /// Another backend job is still outstanding for this workflow.
    #[error("another operation is still in progress, please wait for it to finish")]
    ConcurrentOperation,

    /// The operation needs an uploaded document and none exists.
    #[error("no document has been uploaded yet")]
    NoDocument,

    /// Stage transition that the linear workflow does not allow.
    #[error("cannot move from stage {from:?} to {to:?}")]
    InvalidTransition { from: Stage, to: Stage },

    /// Requested session id does not exist in the store.
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// Terminal FAILED status reported by the backend, message verbatim.
    #[error("backend job failed: {0}")]
    BackendJobFailed(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// Session persistence failure.
    #[error("session storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        WorkflowError::Storage(format!("{err:#}"))
    }
}
