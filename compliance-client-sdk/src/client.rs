//! Backend API client.
//!
//! [`BackendClient`] is the seam the orchestration engine is written
//! against; [`HttpBackendClient`] is the reqwest implementation used in
//! production. Error mapping happens here: HTTP 404 becomes
//! [`ApiError::NotFound`] (a transient "backend does not know the resource
//! yet" signal for pollers), other non-2xx statuses become
//! [`ApiError::Backend`] with the backend's own message text.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::types::{
    AnalysisProgress, FrameworkSelection, StartComplianceAck, StatusSnapshot, SuggestedStandard,
    UploadReceipt,
};

/// Errors produced by backend calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend does not (yet) know the resource. Pollers treat this as
    /// transient; a session reconciliation treats it as a stale session.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Non-2xx response with the backend's own error text.
    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// Connection, TLS, or timeout failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            resource: resource.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Operations the orchestration engine needs from the backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Multipart document upload. Returns the backend-assigned document id.
    async fn upload_document(&self, file_name: &str, bytes: Vec<u8>) -> ApiResult<UploadReceipt>;

    /// Lightweight combined status: metadata extraction, stored selections,
    /// coarse progress.
    async fn document_status(&self, document_id: &str) -> ApiResult<StatusSnapshot>;

    /// Cheap, frequent compliance progress call.
    async fn analysis_progress(&self, document_id: &str) -> ApiResult<AnalysisProgress>;

    /// Expensive full result payload, called once per completion. The shape
    /// is owned by the backend and passed through opaquely.
    async fn analysis_results(&self, document_id: &str) -> ApiResult<Value>;

    /// Store the framework/standards selection and kick off analysis.
    async fn select_framework(
        &self,
        document_id: &str,
        selection: &FrameworkSelection,
    ) -> ApiResult<()>;

    /// Explicitly start the compliance engine for a document whose framework
    /// is already stored.
    async fn start_compliance(&self, document_id: &str) -> ApiResult<StartComplianceAck>;

    /// Ask the backend to suggest standards for the given framework and
    /// company profile.
    async fn suggest_standards(
        &self,
        framework: &str,
        metadata: &crate::types::DocumentMetadata,
    ) -> ApiResult<Vec<SuggestedStandard>>;
}

/// reqwest-based [`BackendClient`].
pub struct HttpBackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpBackendClient {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a response to its JSON body, converting error statuses.
    async fn into_json(response: reqwest::Response, resource: &str) -> ApiResult<Value> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::not_found(resource));
        }
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(ApiError::Backend {
                    status: status.as_u16(),
                    message: status.to_string(),
                })
            }
            Err(e) => return Err(ApiError::Transport(e)),
        };
        if !status.is_success() {
            return Err(ApiError::Backend {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }
        Ok(body)
    }
}

/// Pull the most specific error text out of a backend error envelope.
fn extract_error_message(body: &Value) -> String {
    for key in ["detail", "message", "error"] {
        if let Some(text) = body.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    body.to_string()
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn upload_document(&self, file_name: &str, bytes: Vec<u8>) -> ApiResult<UploadReceipt> {
        debug!(file_name, size = bytes.len(), "uploading document");
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.url("/documents"))
            .multipart(form)
            .send()
            .await?;
        let body = Self::into_json(response, "upload").await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn document_status(&self, document_id: &str) -> ApiResult<StatusSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("/analysis/status/{document_id}")))
            .send()
            .await?;
        let body = Self::into_json(response, &format!("document {document_id}")).await?;
        Ok(StatusSnapshot::from_json(document_id, &body))
    }

    async fn analysis_progress(&self, document_id: &str) -> ApiResult<AnalysisProgress> {
        let response = self
            .http
            .get(self.url(&format!("/analysis/progress/{document_id}")))
            .send()
            .await?;
        let body = Self::into_json(response, &format!("progress for {document_id}")).await?;
        Ok(AnalysisProgress::from_json(&body))
    }

    async fn analysis_results(&self, document_id: &str) -> ApiResult<Value> {
        let response = self
            .http
            .get(self.url(&format!("/analysis/results/{document_id}")))
            .send()
            .await?;
        Self::into_json(response, &format!("results for {document_id}")).await
    }

    async fn select_framework(
        &self,
        document_id: &str,
        selection: &FrameworkSelection,
    ) -> ApiResult<()> {
        debug!(
            document_id,
            framework = %selection.framework,
            standards = selection.standards.len(),
            "selecting framework"
        );
        let response = self
            .http
            .post(self.url(&format!("/analysis/{document_id}/select-framework")))
            .json(selection)
            .send()
            .await?;
        Self::into_json(response, &format!("document {document_id}")).await?;
        Ok(())
    }

    async fn start_compliance(&self, document_id: &str) -> ApiResult<StartComplianceAck> {
        let response = self
            .http
            .post(self.url(&format!("/analysis/{document_id}/start-compliance")))
            .send()
            .await?;
        let body = Self::into_json(response, &format!("document {document_id}")).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn suggest_standards(
        &self,
        framework: &str,
        metadata: &crate::types::DocumentMetadata,
    ) -> ApiResult<Vec<SuggestedStandard>> {
        let request = serde_json::json!({
            "framework": framework,
            "company_name": metadata.company_name.clone().unwrap_or_default(),
            "nature_of_business": metadata.nature_of_business.clone().unwrap_or_default(),
            "operational_demographics": metadata.operational_demographics.clone().unwrap_or_default(),
            "financial_statements_type": metadata.financial_statements_type.clone().unwrap_or_default(),
        });
        let response = self
            .http
            .post(self.url("/analysis/suggest-standards"))
            .json(&request)
            .send()
            .await?;
        let body = Self::into_json(response, "standards suggestions").await?;
        let suggestions = body
            .get("suggested_standards")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(suggestions)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_prefers_detail() {
        let body = json!({
            "error": "Server error",
            "detail": "Framework 'XYZ' not found",
        });
        assert_eq!(extract_error_message(&body), "Framework 'XYZ' not found");
    }

    #[test]
    fn test_error_message_falls_back_to_message_then_error() {
        let body = json!({"error": "Document not found", "message": "No results"});
        assert_eq!(extract_error_message(&body), "No results");
        let body = json!({"error": "Document not found"});
        assert_eq!(extract_error_message(&body), "Document not found");
    }

    #[test]
    fn test_error_message_dumps_unknown_envelopes() {
        let body = json!({"oops": true});
        assert!(extract_error_message(&body).contains("oops"));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = HttpBackendClient::new("http://localhost:8000/");
        assert_eq!(client.url("/documents"), "http://localhost:8000/documents");
    }
}
