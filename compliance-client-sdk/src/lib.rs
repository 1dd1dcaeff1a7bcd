// Backend wire types and payload normalization
pub mod types;

// BackendClient trait and reqwest implementation
pub mod client;

pub use client::{ApiError, ApiResult, BackendClient, HttpBackendClient};
pub use types::{
    AnalysisProgress, DocumentMetadata, FrameworkSelection, JobStatus, ProcessingMode,
    StandardProgress, StartComplianceAck, StatusSnapshot, SuggestedStandard, UploadReceipt,
};

// Re-export async trait so engine-side mocks can implement BackendClient
pub use async_trait::async_trait;
