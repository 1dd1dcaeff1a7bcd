//! Workflow state record and stage transitions.
//!
//! All mutation of the workflow goes through this type so the invariants
//! (monotonic stage ordering, analysis guard conditions, duplicate-free
//! standards selection) are enforced in one place. Presentation layers only
//! ever see clones.

use compliance_client_sdk::{AnalysisProgress, DocumentMetadata, ProcessingMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;

/// One phase of the linear workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Upload,
    Metadata,
    FrameworkSelection,
    Analysis,
    Results,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Upload,
        Stage::Metadata,
        Stage::FrameworkSelection,
        Stage::Analysis,
        Stage::Results,
    ];

    pub fn ordinal(self) -> usize {
        match self {
            Stage::Upload => 0,
            Stage::Metadata => 1,
            Stage::FrameworkSelection => 2,
            Stage::Analysis => 3,
            Stage::Results => 4,
        }
    }

    /// The stage immediately preceding this one.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Upload => None,
            Stage::Metadata => Some(Stage::Upload),
            Stage::FrameworkSelection => Some(Stage::Metadata),
            Stage::Analysis => Some(Stage::FrameworkSelection),
            Stage::Results => Some(Stage::Analysis),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Upload => "Upload",
            Stage::Metadata => "Metadata",
            Stage::FrameworkSelection => "Framework Selection",
            Stage::Analysis => "Analysis",
            Stage::Results => "Results",
        }
    }
}

/// Completion/active flags recorded per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub completed: bool,
    pub active: bool,
}

/// The single mutable record owned by the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Backend-assigned identifier, set on successful upload and cleared
    /// only by a full reset.
    pub document_id: Option<String>,
    stage: Stage,
    stage_flags: [StageFlags; 5],
    pub document_metadata: DocumentMetadata,
    pub selected_framework: Option<String>,
    selected_standards: Vec<String>,
    /// AI-recommended standards, kept apart from the selection so the
    /// recommendation provenance survives user edits.
    pub ai_suggested_standards: Vec<String>,
    /// True while any watcher has an outstanding backend job.
    pub is_processing: bool,
    /// Last observed progress snapshot, overwritten wholesale each poll.
    pub current_progress: Option<AnalysisProgress>,
    /// Final payload once analysis completes; backend-owned shape.
    pub analysis_results: Option<Value>,
    pub special_instructions: Option<String>,
    pub processing_mode: ProcessingMode,
}

impl Default for WorkflowState {
    fn default() -> Self {
        let mut stage_flags = [StageFlags::default(); 5];
        stage_flags[Stage::Upload.ordinal()].active = true;
        Self {
            document_id: None,
            stage: Stage::Upload,
            stage_flags,
            document_metadata: DocumentMetadata::default(),
            selected_framework: None,
            selected_standards: Vec::new(),
            ai_suggested_standards: Vec::new(),
            is_processing: false,
            current_progress: None,
            analysis_results: None,
            special_instructions: None,
            processing_mode: ProcessingMode::default(),
        }
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently active stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn stage_flags(&self, stage: Stage) -> StageFlags {
        self.stage_flags[stage.ordinal()]
    }

    pub fn selected_standards(&self) -> &[String] {
        &self.selected_standards
    }

    /// Whether the analysis guard conditions hold.
    pub fn analysis_ready(&self) -> bool {
        self.selected_framework
            .as_deref()
            .is_some_and(|f| !f.trim().is_empty())
            && !self.selected_standards.is_empty()
    }

    /// Forward transition: stages below the target become completed, the
    /// target becomes active, later stages stay untouched.
    ///
    /// Entering [`Stage::Analysis`] requires a framework and a non-empty
    /// standards selection; the transition fails fast with
    /// [`WorkflowError::MissingAnalysisParameters`] otherwise.
    pub fn move_to(&mut self, target: Stage) -> Result<(), WorkflowError> {
        if target.ordinal() < self.stage.ordinal() {
            return Err(WorkflowError::InvalidTransition {
                from: self.stage,
                to: target,
            });
        }
        if target == Stage::Analysis && !self.analysis_ready() {
            return Err(WorkflowError::MissingAnalysisParameters);
        }
        for stage in Stage::ALL {
            let flags = &mut self.stage_flags[stage.ordinal()];
            if stage.ordinal() < target.ordinal() {
                flags.completed = true;
                flags.active = false;
            } else if stage == target {
                flags.active = true;
            } else {
                flags.active = false;
            }
        }
        self.stage = target;
        Ok(())
    }

    /// Backward transition by exactly one logical step ("edit previous
    /// selection"). Clears the state the re-entered stage would regenerate
    /// as well as the outputs of the stage being left; recommendation
    /// history (`ai_suggested_standards`) survives.
    pub fn move_to_previous(&mut self) -> Result<Stage, WorkflowError> {
        let target = self
            .stage
            .previous()
            .ok_or(WorkflowError::InvalidTransition {
                from: self.stage,
                to: self.stage,
            })?;

        self.clear_stage_outputs(self.stage);
        self.clear_stage_outputs(target);

        for stage in Stage::ALL {
            let flags = &mut self.stage_flags[stage.ordinal()];
            if stage == target {
                flags.active = true;
                flags.completed = false;
            } else if stage.ordinal() > target.ordinal() {
                flags.active = false;
                flags.completed = false;
            }
        }
        self.stage = target;
        Ok(target)
    }

    /// Rebuild the stage flags for an externally derived stage. Used only
    /// when a loaded session is reconciled against live backend status,
    /// where the persisted stage is not trusted.
    pub(crate) fn reconcile_stage(&mut self, target: Stage) {
        for stage in Stage::ALL {
            let flags = &mut self.stage_flags[stage.ordinal()];
            flags.completed = stage.ordinal() < target.ordinal();
            flags.active = stage == target;
        }
        self.stage = target;
    }

    /// Append a standard, preserving insertion order and rejecting
    /// duplicates. Returns false if it was already selected.
    pub fn add_standard(&mut self, standard: impl Into<String>) -> bool {
        let standard = standard.into();
        if self.selected_standards.contains(&standard) {
            return false;
        }
        self.selected_standards.push(standard);
        true
    }

    /// Replace the selection, deduplicating while preserving order.
    pub fn set_standards<I, S>(&mut self, standards: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_standards.clear();
        for standard in standards {
            self.add_standard(standard);
        }
    }

    /// Full reset back to the Upload stage. This is the only operation
    /// that clears `document_id`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clear document-derived state while keeping the session itself, used
    /// when the backend no longer recognizes the persisted document.
    pub(crate) fn clear_document_state(&mut self) {
        self.document_id = None;
        self.document_metadata = DocumentMetadata::default();
        self.selected_framework = None;
        self.selected_standards.clear();
        self.ai_suggested_standards.clear();
        self.current_progress = None;
        self.analysis_results = None;
        self.is_processing = false;
        self.reconcile_stage(Stage::Upload);
    }

    fn clear_stage_outputs(&mut self, stage: Stage) {
        match stage {
            // document_id is cleared only by a full reset
            Stage::Upload => {}
            Stage::Metadata => self.document_metadata = DocumentMetadata::default(),
            Stage::FrameworkSelection => {
                self.selected_framework = None;
                self.selected_standards.clear();
            }
            Stage::Analysis => {
                self.current_progress = None;
                self.analysis_results = None;
            }
            Stage::Results => {}
        }
    }
}
