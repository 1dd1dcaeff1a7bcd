//! Wire types for the document-analysis backend.
//!
//! The backend returns loosely shaped JSON: status strings vary in casing,
//! metadata fields arrive either as plain strings or as
//! `{value, confidence, extraction_method}` envelopes, and progress payloads
//! carry both a nested `overall_progress` object and flattened
//! backwards-compatibility fields. Everything is normalized here, at the
//! boundary, so the engine only ever sees [`StatusSnapshot`] and
//! [`AnalysisProgress`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized backend job status.
///
/// Covers both the overall document status and the per-subsystem statuses
/// (`metadata_extraction`, `compliance_analysis`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    AwaitingFrameworkSelection,
    FrameworkSelected,
    Completed,
    CompletedWithErrors,
    Failed,
    Unknown,
}

impl JobStatus {
    /// Parse a backend status string. Casing and a few legacy spellings vary
    /// between endpoints, so matching is case-insensitive.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "PENDING" => JobStatus::Pending,
            "PROCESSING" | "IN_PROGRESS" => JobStatus::Processing,
            "AWAITING_FRAMEWORK_SELECTION" => JobStatus::AwaitingFrameworkSelection,
            "FRAMEWORK_SELECTED" => JobStatus::FrameworkSelected,
            "COMPLETED" => JobStatus::Completed,
            "COMPLETED_WITH_ERRORS" => JobStatus::CompletedWithErrors,
            "FAILED" | "ERROR" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }

    /// Whether no further progress polling is needed for a compliance job.
    pub fn is_analysis_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }
}

/// Structured metadata extracted from an uploaded document.
///
/// Each field is independently optional; extraction populates them
/// incrementally and partial metadata is actionable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub company_name: Option<String>,
    pub nature_of_business: Option<String>,
    pub operational_demographics: Option<String>,
    pub financial_statements_type: Option<String>,
}

impl DocumentMetadata {
    /// True when at least one field carries a non-empty value.
    pub fn has_any_field(&self) -> bool {
        [
            &self.company_name,
            &self.nature_of_business,
            &self.operational_demographics,
            &self.financial_statements_type,
        ]
        .iter()
        .any(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }

    /// Overlay non-empty fields from `other` onto `self`.
    pub fn merge_from(&mut self, other: &DocumentMetadata) {
        fn overlay(dst: &mut Option<String>, src: &Option<String>) {
            if src.as_deref().is_some_and(|v| !v.trim().is_empty()) {
                *dst = src.clone();
            }
        }
        overlay(&mut self.company_name, &other.company_name);
        overlay(&mut self.nature_of_business, &other.nature_of_business);
        overlay(
            &mut self.operational_demographics,
            &other.operational_demographics,
        );
        overlay(
            &mut self.financial_statements_type,
            &other.financial_statements_type,
        );
    }
}

/// Normalized response of `GET /documents/{id}` (the status endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub document_id: String,
    pub status: JobStatus,
    pub metadata_extraction: JobStatus,
    pub compliance_analysis: JobStatus,
    pub metadata: DocumentMetadata,
    /// Framework already stored on the backend, if any.
    pub framework: Option<String>,
    /// Standards already stored on the backend.
    pub standards: Vec<String>,
    /// Overall progress percentage when the backend reports one.
    pub progress_percent: Option<f64>,
    /// Human-readable backend message, passed through verbatim.
    pub message: Option<String>,
}

impl StatusSnapshot {
    /// Decode the loose JSON of the status endpoint.
    pub fn from_json(document_id: &str, body: &Value) -> Self {
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .map(JobStatus::parse)
            .unwrap_or(JobStatus::Unknown);
        let metadata_extraction = body
            .get("metadata_extraction")
            .and_then(Value::as_str)
            .map(JobStatus::parse)
            .unwrap_or(JobStatus::Pending);
        let compliance_analysis = body
            .get("compliance_analysis")
            .and_then(Value::as_str)
            .map(JobStatus::parse)
            .unwrap_or(JobStatus::Pending);
        let metadata = body
            .get("metadata")
            .map(metadata_from_json)
            .unwrap_or_default();
        let standards = body
            .get("standards")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let progress_percent = body
            .get("progress")
            .and_then(|p| p.get("percentage").or_else(|| p.get("overall_percentage")))
            .and_then(Value::as_f64);

        StatusSnapshot {
            document_id: document_id.to_string(),
            status,
            metadata_extraction,
            compliance_analysis,
            metadata,
            framework: body
                .get("framework")
                .and_then(Value::as_str)
                .map(str::to_string),
            standards,
            progress_percent,
            message: body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Per-standard progress row from the progress endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardProgress {
    pub standard_id: String,
    pub standard_name: Option<String>,
    pub status: Option<String>,
    pub progress_percentage: f64,
    pub completed_questions: u32,
    pub total_questions: u32,
}

/// Normalized response of `GET /progress/{id}` (the cheap, frequent call).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub status: JobStatus,
    pub percentage: f64,
    pub current_standard: Option<String>,
    pub completed_standards: u32,
    pub total_standards: u32,
    pub standards_detail: Vec<StandardProgress>,
    pub message: Option<String>,
}

impl AnalysisProgress {
    /// Decode the progress payload, preferring the nested `overall_progress`
    /// object and falling back to the flattened compatibility fields.
    pub fn from_json(body: &Value) -> Self {
        let overall = body.get("overall_progress");
        let pick_f64 = |nested: &str, flat: &str| -> Option<f64> {
            overall
                .and_then(|o| o.get(nested))
                .and_then(Value::as_f64)
                .or_else(|| body.get(flat).and_then(Value::as_f64))
        };
        let pick_u32 = |nested: &str, flat: &str| -> u32 {
            pick_f64(nested, flat).unwrap_or(0.0) as u32
        };

        let current_standard = overall
            .and_then(|o| o.get("current_standard"))
            .and_then(Value::as_str)
            .or_else(|| body.get("currentStandard").and_then(Value::as_str))
            .map(str::to_string);

        let standards_detail = body
            .get("standards_detail")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|row| StandardProgress {
                        standard_id: row
                            .get("standard_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        standard_name: row
                            .get("standard_name")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        status: row
                            .get("status")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        progress_percentage: row
                            .get("progress_percentage")
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0),
                        completed_questions: row
                            .get("completed_questions")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                        total_questions: row
                            .get("total_questions")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                    })
                    .collect()
            })
            .unwrap_or_default();

        AnalysisProgress {
            status: body
                .get("status")
                .and_then(Value::as_str)
                .map(JobStatus::parse)
                .unwrap_or(JobStatus::Unknown),
            percentage: pick_f64("percentage", "percentage").unwrap_or(0.0),
            current_standard,
            completed_standards: pick_u32("completed_standards", "completedStandards"),
            total_standards: pick_u32("total_standards", "totalStandards"),
            standards_detail,
            message: body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Synthetic placeholder used while the backend does not yet know the
    /// progress resource (404 from a job that is still warming up).
    pub fn synthetic(message: &str) -> Self {
        AnalysisProgress {
            status: JobStatus::Processing,
            percentage: 0.0,
            current_standard: Some(message.to_string()),
            completed_standards: 0,
            total_standards: 0,
            standards_detail: Vec::new(),
            message: Some(message.to_string()),
        }
    }
}

/// Response of the multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub document_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One AI-suggested standard from `POST /suggest-standards`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedStandard {
    pub standard_id: String,
    #[serde(default)]
    pub standard_title: Option<String>,
    #[serde(default)]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Processing mode forwarded to the compliance engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Smart,
    Zap,
    Comparison,
}

/// Request body for `POST /documents/{id}/select-framework`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkSelection {
    pub framework: String,
    pub standards: Vec<String>,
    #[serde(rename = "specialInstructions", skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
    #[serde(rename = "processingMode")]
    pub processing_mode: ProcessingMode,
}

/// Acknowledgement of `POST /documents/{id}/start-compliance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartComplianceAck {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Decode a metadata object whose fields are either plain strings or
/// `{value, confidence, extraction_method}` envelopes.
pub fn metadata_from_json(body: &Value) -> DocumentMetadata {
    fn field(body: &Value, name: &str) -> Option<String> {
        let raw = body.get(name)?;
        let text = match raw {
            Value::String(s) => s.clone(),
            Value::Object(obj) => obj.get("value")?.as_str()?.to_string(),
            _ => return None,
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    DocumentMetadata {
        company_name: field(body, "company_name"),
        nature_of_business: field(body, "nature_of_business"),
        operational_demographics: field(body, "operational_demographics"),
        financial_statements_type: field(body, "financial_statements_type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!(JobStatus::parse("completed"), JobStatus::Completed);
        assert_eq!(JobStatus::parse("COMPLETED"), JobStatus::Completed);
        assert_eq!(
            JobStatus::parse("awaiting_framework_selection"),
            JobStatus::AwaitingFrameworkSelection
        );
        assert_eq!(JobStatus::parse("error"), JobStatus::Failed);
        assert_eq!(JobStatus::parse("whatever"), JobStatus::Unknown);
    }

    #[test]
    fn test_metadata_accepts_flat_strings() {
        let meta = metadata_from_json(&json!({
            "company_name": "Acme",
            "nature_of_business": "  ",
        }));
        assert_eq!(meta.company_name.as_deref(), Some("Acme"));
        assert!(meta.nature_of_business.is_none());
        assert!(meta.has_any_field());
    }

    #[test]
    fn test_metadata_accepts_value_envelopes() {
        let meta = metadata_from_json(&json!({
            "company_name": {"value": "ALDAR Properties", "confidence": 0.9, "extraction_method": "ai"},
            "operational_demographics": {"value": "", "confidence": 0.0},
        }));
        assert_eq!(meta.company_name.as_deref(), Some("ALDAR Properties"));
        assert!(meta.operational_demographics.is_none());
    }

    #[test]
    fn test_empty_metadata_has_no_fields() {
        assert!(!DocumentMetadata::default().has_any_field());
    }

    #[test]
    fn test_merge_keeps_existing_when_other_is_empty() {
        let mut base = DocumentMetadata {
            company_name: Some("Acme".into()),
            ..Default::default()
        };
        base.merge_from(&DocumentMetadata {
            nature_of_business: Some("Retail".into()),
            ..Default::default()
        });
        assert_eq!(base.company_name.as_deref(), Some("Acme"));
        assert_eq!(base.nature_of_business.as_deref(), Some("Retail"));
    }

    #[test]
    fn test_snapshot_from_loose_json() {
        let body = json!({
            "status": "PROCESSING",
            "metadata_extraction": "completed",
            "metadata": {"company_name": "Acme"},
            "framework": "IFRS",
            "standards": ["IAS 1", "IAS 7"],
            "progress": {"percentage": 42.5},
            "message": "Analysis in progress",
        });
        let snap = StatusSnapshot::from_json("D1", &body);
        assert_eq!(snap.status, JobStatus::Processing);
        assert_eq!(snap.metadata_extraction, JobStatus::Completed);
        assert_eq!(snap.framework.as_deref(), Some("IFRS"));
        assert_eq!(snap.standards, vec!["IAS 1", "IAS 7"]);
        assert_eq!(snap.progress_percent, Some(42.5));
    }

    #[test]
    fn test_snapshot_defaults_when_fields_absent() {
        let snap = StatusSnapshot::from_json("D1", &json!({}));
        assert_eq!(snap.status, JobStatus::Unknown);
        assert_eq!(snap.metadata_extraction, JobStatus::Pending);
        assert!(snap.standards.is_empty());
        assert!(!snap.metadata.has_any_field());
    }

    #[test]
    fn test_progress_prefers_nested_overall_block() {
        let body = json!({
            "status": "PROCESSING",
            "overall_progress": {
                "percentage": 61.2,
                "completed_standards": 1,
                "total_standards": 2,
                "current_standard": "IAS 7",
            },
            "percentage": 50,
            "currentStandard": "stale",
            "completedStandards": 0,
            "totalStandards": 0,
        });
        let progress = AnalysisProgress::from_json(&body);
        assert_eq!(progress.percentage, 61.2);
        assert_eq!(progress.current_standard.as_deref(), Some("IAS 7"));
        assert_eq!(progress.completed_standards, 1);
        assert_eq!(progress.total_standards, 2);
    }

    #[test]
    fn test_progress_falls_back_to_flat_fields() {
        let body = json!({
            "status": "PROCESSING",
            "percentage": 15,
            "currentStandard": "Analysis in progress...",
            "completedStandards": 0,
            "totalStandards": 2,
        });
        let progress = AnalysisProgress::from_json(&body);
        assert_eq!(progress.percentage, 15.0);
        assert_eq!(progress.total_standards, 2);
        assert_eq!(
            progress.current_standard.as_deref(),
            Some("Analysis in progress...")
        );
    }

    #[test]
    fn test_progress_standards_detail_rows() {
        let body = json!({
            "status": "PROCESSING",
            "percentage": 30,
            "standards_detail": [
                {
                    "standard_id": "IAS 1",
                    "standard_name": "Presentation of Financial Statements",
                    "status": "processing",
                    "progress_percentage": 55.5,
                    "completed_questions": 5,
                    "total_questions": 9
                }
            ],
        });
        let progress = AnalysisProgress::from_json(&body);
        assert_eq!(progress.standards_detail.len(), 1);
        let row = &progress.standards_detail[0];
        assert_eq!(row.standard_id, "IAS 1");
        assert_eq!(row.completed_questions, 5);
        assert_eq!(row.total_questions, 9);
    }

    #[test]
    fn test_framework_selection_wire_names() {
        let selection = FrameworkSelection {
            framework: "IFRS".into(),
            standards: vec!["IAS 1".into()],
            special_instructions: Some("focus on leases".into()),
            processing_mode: ProcessingMode::Smart,
        };
        let body = serde_json::to_value(&selection).unwrap();
        assert_eq!(body["specialInstructions"], "focus on leases");
        assert_eq!(body["processingMode"], "smart");
    }
}
