//! Scripted backend and fixture builders shared by the crate's tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use compliance_client_sdk::{
    async_trait, AnalysisProgress, ApiError, ApiResult, BackendClient, DocumentMetadata,
    FrameworkSelection, JobStatus, StartComplianceAck, StatusSnapshot, SuggestedStandard,
    UploadReceipt,
};
use serde_json::Value;

/// Clone a scripted result. `ApiError` is not `Clone` because of the
/// transport variants, so scripts are limited to the two synthesizable
/// error shapes.
fn clone_result<T: Clone>(result: &ApiResult<T>) -> ApiResult<T> {
    match result {
        Ok(value) => Ok(value.clone()),
        Err(ApiError::NotFound { resource }) => Err(ApiError::not_found(resource.clone())),
        Err(ApiError::Backend { status, message }) => Err(ApiError::Backend {
            status: *status,
            message: message.clone(),
        }),
        Err(other) => panic!("scripted backends cannot replay {other}"),
    }
}

/// Pop the next scripted response; the last one sticks and repeats so a
/// script describes "and then it stays like this" without counting ticks.
fn next<T: Clone>(queue: &Mutex<VecDeque<ApiResult<T>>>, endpoint: &str) -> ApiResult<T> {
    let mut queue = queue.lock().unwrap();
    match queue.len() {
        0 => panic!("no scripted response for {endpoint}"),
        1 => clone_result(&queue[0]),
        _ => queue.pop_front().unwrap(),
    }
}

/// In-memory [`BackendClient`] driven by per-endpoint response scripts.
#[derive(Default)]
pub struct ScriptedBackend {
    uploads: Mutex<VecDeque<ApiResult<UploadReceipt>>>,
    statuses: Mutex<VecDeque<ApiResult<StatusSnapshot>>>,
    progress: Mutex<VecDeque<ApiResult<AnalysisProgress>>>,
    results: Mutex<VecDeque<ApiResult<Value>>>,
    select_framework: Mutex<VecDeque<ApiResult<()>>>,
    start_compliance: Mutex<VecDeque<ApiResult<StartComplianceAck>>>,
    suggestions: Mutex<VecDeque<ApiResult<Vec<SuggestedStandard>>>>,

    status_calls: AtomicU32,
    progress_calls: AtomicU32,
    results_calls: AtomicU32,
    select_framework_calls: AtomicU32,
    start_compliance_calls: AtomicU32,

    last_selection: Mutex<Option<FrameworkSelection>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_upload(&self, result: ApiResult<UploadReceipt>) {
        self.uploads.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, result: ApiResult<StatusSnapshot>) {
        self.statuses.lock().unwrap().push_back(result);
    }

    pub fn push_progress(&self, result: ApiResult<AnalysisProgress>) {
        self.progress.lock().unwrap().push_back(result);
    }

    pub fn push_results(&self, result: ApiResult<Value>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn push_select_framework(&self, result: ApiResult<()>) {
        self.select_framework.lock().unwrap().push_back(result);
    }

    pub fn push_start_compliance(&self, result: ApiResult<StartComplianceAck>) {
        self.start_compliance.lock().unwrap().push_back(result);
    }

    pub fn push_suggestions(&self, result: ApiResult<Vec<SuggestedStandard>>) {
        self.suggestions.lock().unwrap().push_back(result);
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn progress_calls(&self) -> u32 {
        self.progress_calls.load(Ordering::SeqCst)
    }

    pub fn results_calls(&self) -> u32 {
        self.results_calls.load(Ordering::SeqCst)
    }

    pub fn select_framework_calls(&self) -> u32 {
        self.select_framework_calls.load(Ordering::SeqCst)
    }

    pub fn start_compliance_calls(&self) -> u32 {
        self.start_compliance_calls.load(Ordering::SeqCst)
    }

    pub fn last_selection(&self) -> Option<FrameworkSelection> {
        self.last_selection.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    async fn upload_document(&self, _file_name: &str, _bytes: Vec<u8>) -> ApiResult<UploadReceipt> {
        next(&self.uploads, "upload")
    }

    async fn document_status(&self, _document_id: &str) -> ApiResult<StatusSnapshot> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.statuses, "status")
    }

    async fn analysis_progress(&self, _document_id: &str) -> ApiResult<AnalysisProgress> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.progress, "progress")
    }

    async fn analysis_results(&self, _document_id: &str) -> ApiResult<Value> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.results, "results")
    }

    async fn select_framework(
        &self,
        _document_id: &str,
        selection: &FrameworkSelection,
    ) -> ApiResult<()> {
        self.select_framework_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_selection.lock().unwrap() = Some(selection.clone());
        next(&self.select_framework, "select-framework")
    }

    async fn start_compliance(&self, _document_id: &str) -> ApiResult<StartComplianceAck> {
        self.start_compliance_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.start_compliance, "start-compliance")
    }

    async fn suggest_standards(
        &self,
        _framework: &str,
        _metadata: &DocumentMetadata,
    ) -> ApiResult<Vec<SuggestedStandard>> {
        next(&self.suggestions, "suggest-standards")
    }
}

pub fn upload_ok(document_id: &str) -> UploadReceipt {
    UploadReceipt {
        document_id: document_id.to_string(),
        status: Some("PENDING".into()),
        message: None,
    }
}

/// Empty processing snapshot: job alive, zero metadata fields.
pub fn processing_status(document_id: &str) -> StatusSnapshot {
    StatusSnapshot {
        document_id: document_id.to_string(),
        status: JobStatus::Processing,
        metadata_extraction: JobStatus::Processing,
        compliance_analysis: JobStatus::Pending,
        metadata: DocumentMetadata::default(),
        framework: None,
        standards: Vec::new(),
        progress_percent: None,
        message: None,
    }
}

pub fn status_with_company(document_id: &str, company: &str) -> StatusSnapshot {
    let mut snap = processing_status(document_id);
    snap.metadata.company_name = Some(company.to_string());
    snap
}

pub fn progress_at(percentage: f64, current_standard: &str) -> AnalysisProgress {
    AnalysisProgress {
        status: JobStatus::Processing,
        percentage,
        current_standard: Some(current_standard.to_string()),
        completed_standards: 0,
        total_standards: 2,
        standards_detail: Vec::new(),
        message: None,
    }
}

pub fn terminal_progress(status: JobStatus) -> AnalysisProgress {
    AnalysisProgress {
        status,
        percentage: 100.0,
        current_standard: None,
        completed_standards: 2,
        total_standards: 2,
        standards_detail: Vec::new(),
        message: None,
    }
}

/// Poll `predicate` until it holds or the deadline passes.
pub async fn wait_for(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
