//! Workflow orchestration engine.
//!
//! [`WorkflowEngine`] is a cloneable handle over shared state. All mutation
//! of [`WorkflowState`] flows through the engine so the stage invariants are
//! enforced in one place; presentation layers read clones via
//! [`WorkflowEngine::snapshot`] and follow along via
//! [`WorkflowEngine::subscribe`].
//!
//! Every await point is a hazard: the workflow may be reset or pointed at a
//! different document while a request is in flight. Each post-await state
//! application therefore revalidates that the document id still matches
//! before touching anything, and discards the result silently otherwise.

use std::sync::{Arc, Mutex};

use chrono::Local;
use compliance_client_sdk::{
    AnalysisProgress, BackendClient, DocumentMetadata, FrameworkSelection, JobStatus,
    ProcessingMode, StatusSnapshot, SuggestedStandard,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::database::{SessionRecord, SessionStore, SessionSummary};
use crate::error::WorkflowError;
use crate::messages::{MessageEntry, MessageKind, MessageLog};
use crate::poller::StatusPoller;
use crate::state::{Stage, WorkflowState};
use crate::watchers::{
    extraction_finished, watch_analysis, watch_metadata, AnalysisOutcome, MetadataOutcome,
};

/// Change notifications for presentation layers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StageChanged(Stage),
    Message(MessageEntry),
    Progress(AnalysisProgress),
    WorkflowReset,
}

struct EngineCore {
    state: WorkflowState,
    log: MessageLog,
    session_id: Option<String>,
    session_title: Option<String>,
}

struct EngineInner {
    client: Arc<dyn BackendClient>,
    config: EngineConfig,
    store: Option<SessionStore>,
    core: Mutex<EngineCore>,
    metadata_poller: StatusPoller,
    analysis_poller: StatusPoller,
    events: broadcast::Sender<EngineEvent>,
}

/// Cloneable handle to the orchestration engine.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

/// What a terminated metadata phase leads into.
enum AfterMetadata {
    Done,
    RunAnalysis,
}

/// Reconciliation action derived from live backend status on session resume.
enum ResumeAction {
    None,
    FetchResults { with_errors: bool },
    PollAnalysis,
    PollMetadata,
}

impl WorkflowEngine {
    pub fn new(client: Arc<dyn BackendClient>, config: EngineConfig) -> Self {
        Self::build(client, config, None)
    }

    pub fn with_store(
        client: Arc<dyn BackendClient>,
        config: EngineConfig,
        store: SessionStore,
    ) -> Self {
        Self::build(client, config, Some(store))
    }

    fn build(
        client: Arc<dyn BackendClient>,
        config: EngineConfig,
        store: Option<SessionStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(128);
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                client,
                config,
                store,
                core: Mutex::new(EngineCore {
                    state: WorkflowState::new(),
                    log: MessageLog::new(),
                    session_id: None,
                    session_title: None,
                }),
                metadata_poller: StatusPoller::new(),
                analysis_poller: StatusPoller::new(),
                events,
            }),
        }
    }

    /// Run `f` under the state lock, then broadcast whatever events it
    /// collected after the lock is released.
    fn with_core<R>(&self, f: impl FnOnce(&mut EngineCore, &mut Vec<EngineEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut core = self.inner.core.lock().unwrap();
            f(&mut core, &mut events)
        };
        for event in events {
            let _ = self.inner.events.send(event);
        }
        result
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.inner.core.lock().unwrap().state.clone()
    }

    pub fn messages(&self) -> Vec<MessageEntry> {
        self.inner.core.lock().unwrap().log.entries().to_vec()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.core.lock().unwrap().session_id.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    fn store(&self) -> Result<&SessionStore, WorkflowError> {
        self.inner
            .store
            .as_ref()
            .ok_or_else(|| WorkflowError::Storage("no session store configured".into()))
    }

    fn cancel_watchers(&self) {
        self.inner.metadata_poller.cancel();
        self.inner.analysis_poller.cancel();
    }

    /// Upload a document and drive the metadata stage to its terminal
    /// outcome. Returns the backend-assigned document id.
    ///
    /// Rejected with [`WorkflowError::ConcurrentOperation`] while another
    /// backend job is outstanding; starting a fresh document otherwise
    /// clears all state derived from the previous one.
    pub async fn start_upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, WorkflowError> {
        self.with_core(|core, events| {
            if core.state.is_processing {
                return Err(WorkflowError::ConcurrentOperation);
            }
            core.state.clear_document_state();
            core.state.is_processing = true;
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::User,
                format!("Uploaded {file_name}"),
                None,
            )));
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::Loading,
                "Uploading document...",
                None,
            )));
            Ok(())
        })?;

        let receipt = match self.inner.client.upload_document(file_name, bytes).await {
            Ok(receipt) => receipt,
            Err(error) => {
                self.with_core(|core, events| {
                    core.state.is_processing = false;
                    events.push(EngineEvent::Message(core.log.resolve_loading(
                        MessageKind::System,
                        format!("Upload failed: {error}"),
                        None,
                    )));
                });
                return Err(error.into());
            }
        };

        let document_id = receipt.document_id.clone();
        info!(document_id, file_name, "document uploaded");
        self.with_core(|core, events| -> Result<(), WorkflowError> {
            core.state.document_id = Some(document_id.clone());
            if core.session_id.is_none() {
                core.session_id = Some(Uuid::new_v4().to_string());
                core.session_title = Some(file_name.to_string());
            }
            core.state.move_to(Stage::Metadata)?;
            events.push(EngineEvent::StageChanged(Stage::Metadata));
            events.push(EngineEvent::Message(core.log.resolve_loading(
                MessageKind::System,
                format!("Document uploaded as {document_id}."),
                Some(&document_id),
            )));
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::Loading,
                "Extracting document metadata...",
                Some(&document_id),
            )));
            Ok(())
        })?;

        self.run_metadata_phase(&document_id).await?;
        Ok(document_id)
    }

    /// Apply user edits to the extracted metadata and advance to framework
    /// selection.
    pub fn confirm_metadata(&self, edits: DocumentMetadata) -> Result<(), WorkflowError> {
        self.with_core(|core, events| {
            if core.state.document_id.is_none() {
                return Err(WorkflowError::NoDocument);
            }
            if core.state.is_processing {
                return Err(WorkflowError::ConcurrentOperation);
            }
            core.state.document_metadata.merge_from(&edits);
            core.state.move_to(Stage::FrameworkSelection)?;
            events.push(EngineEvent::StageChanged(Stage::FrameworkSelection));
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::System,
                "Company details confirmed. Choose a reporting framework and standards.",
                core.state.document_id.as_deref(),
            )));
            Ok(())
        })
    }

    /// Ask the backend for standards recommendations based on the extracted
    /// company profile. Recommendations are recorded apart from the user's
    /// selection; they seed the selection only when
    /// [`EngineConfig::auto_select_suggested`] is set and the user has not
    /// picked anything yet.
    pub async fn suggest_standards(
        &self,
        framework: &str,
    ) -> Result<Vec<SuggestedStandard>, WorkflowError> {
        let (document_id, metadata) = self.with_core(|core, _| {
            core.state
                .document_id
                .clone()
                .ok_or(WorkflowError::NoDocument)
                .map(|id| (id, core.state.document_metadata.clone()))
        })?;

        let suggestions = self.inner.client.suggest_standards(framework, &metadata).await?;
        let auto_select = self.inner.config.auto_select_suggested;
        self.with_core(|core, events| {
            if core.state.document_id.as_deref() != Some(document_id.as_str()) {
                return;
            }
            core.state.ai_suggested_standards =
                suggestions.iter().map(|s| s.standard_id.clone()).collect();
            if auto_select && core.state.selected_standards().is_empty() {
                let seeded = core.state.ai_suggested_standards.clone();
                core.state.set_standards(seeded);
            }
            events.push(EngineEvent::Message(core.log.push_with_metadata(
                MessageKind::Component,
                format!("{} standards suggested for {framework}", suggestions.len()),
                Some(&document_id),
                serde_json::to_value(&suggestions).unwrap_or(Value::Null),
            )));
        });
        Ok(suggestions)
    }

    /// Submit the framework/standards selection and drive the analysis
    /// stage to its terminal outcome.
    ///
    /// The guard is evaluated before any network call: an empty framework or
    /// an empty (post-dedup) standards list fails with
    /// [`WorkflowError::MissingAnalysisParameters`] without touching the
    /// backend.
    pub async fn select_framework_and_standards(
        &self,
        framework: &str,
        standards: &[String],
        special_instructions: Option<String>,
        processing_mode: ProcessingMode,
    ) -> Result<(), WorkflowError> {
        let framework = framework.trim();
        let mut deduped: Vec<String> = Vec::new();
        for standard in standards {
            if !deduped.contains(standard) {
                deduped.push(standard.clone());
            }
        }
        if framework.is_empty() || deduped.is_empty() {
            return Err(WorkflowError::MissingAnalysisParameters);
        }

        let document_id = self.with_core(|core, events| {
            let document_id = core
                .state
                .document_id
                .clone()
                .ok_or(WorkflowError::NoDocument)?;
            if core.state.is_processing {
                return Err(WorkflowError::ConcurrentOperation);
            }
            // the transition must be known-valid before any selection field
            // is overwritten; a rejected call must not leak into the snapshot
            if Stage::Analysis.ordinal() < core.state.stage().ordinal() {
                return Err(WorkflowError::InvalidTransition {
                    from: core.state.stage(),
                    to: Stage::Analysis,
                });
            }
            core.state.selected_framework = Some(framework.to_string());
            core.state.set_standards(deduped.clone());
            core.state.special_instructions = special_instructions.clone();
            core.state.processing_mode = processing_mode;
            core.state.move_to(Stage::Analysis)?;
            core.state.is_processing = true;
            events.push(EngineEvent::StageChanged(Stage::Analysis));
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::User,
                format!(
                    "Analyze against {framework} ({} standards)",
                    core.state.selected_standards().len()
                ),
                Some(&document_id),
            )));
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::Loading,
                "Starting compliance analysis...",
                Some(&document_id),
            )));
            Ok(document_id)
        })?;

        let selection = FrameworkSelection {
            framework: framework.to_string(),
            standards: deduped,
            special_instructions,
            processing_mode,
        };
        if let Err(error) = self
            .inner
            .client
            .select_framework(&document_id, &selection)
            .await
        {
            self.with_core(|core, events| {
                if core.state.document_id.as_deref() != Some(document_id.as_str()) {
                    return;
                }
                core.state.is_processing = false;
                events.push(EngineEvent::Message(core.log.resolve_loading(
                    MessageKind::System,
                    format!("Could not submit the framework selection: {error}"),
                    Some(&document_id),
                )));
            });
            return Err(error.into());
        }

        self.run_analysis_phase(&document_id).await
    }

    /// Step the workflow back to `target` and re-run its watcher-backed
    /// work. Each backward step clears the state the re-entered stage
    /// regenerates.
    pub async fn retry_from_stage(&self, target: Stage) -> Result<(), WorkflowError> {
        let document_id = self.with_core(|core, events| {
            // validate before any side effect: a rejected retry must not
            // cancel a live watcher
            if target.ordinal() > core.state.stage().ordinal() {
                return Err(WorkflowError::InvalidTransition {
                    from: core.state.stage(),
                    to: target,
                });
            }
            self.cancel_watchers();
            core.state.is_processing = false;
            while core.state.stage() != target {
                core.state.move_to_previous()?;
            }
            events.push(EngineEvent::StageChanged(target));
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::System,
                format!("Returned to the {} step.", target.label()),
                core.state.document_id.as_deref(),
            )));
            Ok(core.state.document_id.clone())
        })?;

        match (target, document_id) {
            (Stage::Metadata, Some(document_id)) => {
                self.with_core(|core, events| {
                    core.state.is_processing = true;
                    events.push(EngineEvent::Message(core.log.push(
                        MessageKind::Loading,
                        "Extracting document metadata...",
                        Some(&document_id),
                    )));
                });
                self.run_metadata_phase(&document_id).await
            }
            (Stage::Analysis, Some(document_id)) => {
                let selection = self.with_core(|core, _| {
                    core.state
                        .selected_framework
                        .clone()
                        .map(|framework| FrameworkSelection {
                            framework,
                            standards: core.state.selected_standards().to_vec(),
                            special_instructions: core.state.special_instructions.clone(),
                            processing_mode: core.state.processing_mode,
                        })
                });
                let selection = selection.ok_or(WorkflowError::MissingAnalysisParameters)?;
                if selection.standards.is_empty() {
                    return Err(WorkflowError::MissingAnalysisParameters);
                }
                self.with_core(|core, events| {
                    core.state.is_processing = true;
                    events.push(EngineEvent::Message(core.log.push(
                        MessageKind::Loading,
                        "Restarting compliance analysis...",
                        Some(&document_id),
                    )));
                });
                if let Err(error) = self
                    .inner
                    .client
                    .select_framework(&document_id, &selection)
                    .await
                {
                    self.with_core(|core, events| {
                        core.state.is_processing = false;
                        events.push(EngineEvent::Message(core.log.resolve_loading(
                            MessageKind::System,
                            format!("Could not restart the analysis: {error}"),
                            Some(&document_id),
                        )));
                    });
                    return Err(error.into());
                }
                self.run_analysis_phase(&document_id).await
            }
            _ => Ok(()),
        }
    }

    /// Full reset: cancel all watchers and return to a blank Upload stage.
    /// The session itself (id, title, narration history) is kept.
    pub fn reset_workflow(&self) {
        self.cancel_watchers();
        self.with_core(|core, events| {
            core.state.reset();
            events.push(EngineEvent::WorkflowReset);
            events.push(EngineEvent::Message(core.log.push(
                MessageKind::System,
                "Workflow reset. Upload a document to begin again.",
                None,
            )));
        });
    }

    /// Persist the current workflow and narration as a session record.
    /// Idempotent; saving twice with unchanged state writes the same record.
    pub fn save_session(&self) -> Result<String, WorkflowError> {
        let store = self.store()?;
        let record = self.with_core(|core, _| {
            let session_id = core
                .session_id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            SessionRecord {
                session_id,
                title: core
                    .session_title
                    .clone()
                    .unwrap_or_else(|| "Untitled session".to_string()),
                last_document_id: core.state.document_id.clone(),
                chat_state: core.state.clone(),
                messages: core.log.entries().to_vec(),
                updated_at: Local::now(),
            }
        });
        store.save(&record)?;
        Ok(record.session_id)
    }

    /// Load a persisted session and reconcile it against live backend
    /// status. The persisted stage is a hint, not the truth: the backend
    /// decides whether the document still exists, whether analysis finished
    /// while the client was away, and whether polling should resume.
    pub async fn resume_session(&self, session_id: &str) -> Result<(), WorkflowError> {
        let store = self.store()?;
        let record = store
            .load(session_id)?
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))?;

        self.cancel_watchers();
        let document_id = record.last_document_id.clone();
        self.with_core(|core, events| {
            core.session_id = Some(record.session_id.clone());
            core.session_title = Some(record.title.clone());
            core.state = record.chat_state;
            // whatever job was outstanding when the session was saved is
            // not running in this process
            core.state.is_processing = false;
            core.log = MessageLog::from_entries(record.messages);
            events.push(EngineEvent::StageChanged(core.state.stage()));
        });

        let Some(document_id) = document_id else {
            return Ok(());
        };

        match self.inner.client.document_status(&document_id).await {
            Err(error) if error.is_not_found() => {
                info!(document_id, "resumed document unknown to backend, resetting");
                self.with_core(|core, events| {
                    core.state.clear_document_state();
                    events.push(EngineEvent::StageChanged(Stage::Upload));
                    events.push(EngineEvent::Message(core.log.push(
                        MessageKind::System,
                        "The document from this session is no longer available on the backend. \
                         Please re-upload it.",
                        Some(&document_id),
                    )));
                });
                Ok(())
            }
            Err(error) => {
                warn!(%error, document_id, "could not verify backend status for resumed session");
                self.with_core(|core, events| {
                    events.push(EngineEvent::Message(core.log.push(
                        MessageKind::System,
                        "Could not verify the backend status for this session; continuing with \
                         the saved state.",
                        Some(&document_id),
                    )));
                });
                Ok(())
            }
            Ok(snapshot) => {
                self.reconcile_resumed(&document_id, snapshot).await;
                Ok(())
            }
        }
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, WorkflowError> {
        Ok(self.store()?.list()?)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), WorkflowError> {
        if self.store()?.delete(session_id)? {
            Ok(())
        } else {
            Err(WorkflowError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Metadata phase: watch extraction, then apply the terminal outcome.
    /// Every terminal snapshot (clean, stuck, or timed out) goes through
    /// [`Self::apply_backend_selection`] so a backend-preselected framework
    /// is honored no matter how extraction ended.
    async fn run_metadata_phase(&self, document_id: &str) -> Result<(), WorkflowError> {
        let outcome = watch_metadata(
            self.inner.client.as_ref(),
            &self.inner.metadata_poller,
            &self.inner.config,
            document_id,
        )
        .await;

        let next = self.with_core(|core, events| {
            if core.state.document_id.as_deref() != Some(document_id) {
                return AfterMetadata::Done;
            }
            match outcome {
                MetadataOutcome::Ready { snapshot, .. } => {
                    core.state.document_metadata.merge_from(&snapshot.metadata);
                    core.state.is_processing = false;
                    events.push(EngineEvent::Message(core.log.resolve_loading(
                        MessageKind::System,
                        "Metadata extracted. Review the details and choose a reporting framework.",
                        Some(document_id),
                    )));
                    Self::apply_backend_selection(core, events, document_id, &snapshot)
                }
                MetadataOutcome::Stuck { last, attempt } => {
                    if let Some(snapshot) = &last {
                        core.state.document_metadata.merge_from(&snapshot.metadata);
                    }
                    core.state.is_processing = false;
                    info!(document_id, attempt, "metadata extraction declared stuck");
                    events.push(EngineEvent::Message(core.log.resolve_loading(
                        MessageKind::System,
                        "Metadata extraction has produced nothing so far and appears stuck. \
                         You can enter the company details manually and continue.",
                        Some(document_id),
                    )));
                    match &last {
                        Some(snapshot) => {
                            Self::apply_backend_selection(core, events, document_id, snapshot)
                        }
                        None => AfterMetadata::Done,
                    }
                }
                MetadataOutcome::TimedOut { last, .. } => {
                    if let Some(snapshot) = &last {
                        core.state.document_metadata.merge_from(&snapshot.metadata);
                    }
                    core.state.is_processing = false;
                    events.push(EngineEvent::Message(core.log.resolve_loading(
                        MessageKind::System,
                        "Metadata extraction timed out. You can enter the company details \
                         manually and continue.",
                        Some(document_id),
                    )));
                    match &last {
                        Some(snapshot) => {
                            Self::apply_backend_selection(core, events, document_id, snapshot)
                        }
                        None => AfterMetadata::Done,
                    }
                }
                MetadataOutcome::Failed { error } => {
                    core.state.is_processing = false;
                    events.push(EngineEvent::Message(core.log.resolve_loading(
                        MessageKind::System,
                        format!("Metadata extraction failed: {error}"),
                        Some(document_id),
                    )));
                    AfterMetadata::Done
                }
                MetadataOutcome::Cancelled => AfterMetadata::Done,
            }
        });

        match next {
            AfterMetadata::RunAnalysis => self.run_analysis_phase(document_id).await,
            AfterMetadata::Done => Ok(()),
        }
    }

    /// Backend-preselection check applied to every terminal metadata
    /// snapshot. A framework with a non-empty standards selection advances
    /// straight to analysis; a framework without standards is narrated as a
    /// configuration error, never silently skipped.
    fn apply_backend_selection(
        core: &mut EngineCore,
        events: &mut Vec<EngineEvent>,
        document_id: &str,
        snapshot: &StatusSnapshot,
    ) -> AfterMetadata {
        match snapshot.framework.clone() {
            Some(framework) if snapshot.standards.is_empty() => {
                events.push(EngineEvent::Message(core.log.push(
                    MessageKind::System,
                    format!(
                        "The backend pre-selected framework {framework} but no \
                         standards; select standards to continue."
                    ),
                    Some(document_id),
                )));
                AfterMetadata::Done
            }
            Some(framework) => {
                core.state.selected_framework = Some(framework.clone());
                core.state.set_standards(snapshot.standards.iter().cloned());
                match core.state.move_to(Stage::Analysis) {
                    Ok(()) => {
                        core.state.is_processing = true;
                        events.push(EngineEvent::StageChanged(Stage::Analysis));
                        events.push(EngineEvent::Message(core.log.push(
                            MessageKind::System,
                            format!(
                                "Framework {framework} already selected on the \
                                 backend; continuing with the analysis."
                            ),
                            Some(document_id),
                        )));
                        events.push(EngineEvent::Message(core.log.push(
                            MessageKind::Loading,
                            "Tracking compliance analysis...",
                            Some(document_id),
                        )));
                        AfterMetadata::RunAnalysis
                    }
                    Err(error) => {
                        warn!(%error, "automation shortcut rejected");
                        AfterMetadata::Done
                    }
                }
            }
            None => AfterMetadata::Done,
        }
    }

    /// Analysis phase: watch progress to a terminal state, handling the
    /// FRAMEWORK_SELECTED intermediate state by starting the compliance
    /// engine and restarting the watch only when that start is acknowledged
    /// as successful.
    async fn run_analysis_phase(&self, document_id: &str) -> Result<(), WorkflowError> {
        loop {
            let outcome = watch_analysis(
                self.inner.client.as_ref(),
                &self.inner.analysis_poller,
                &self.inner.config,
                document_id,
                |progress| self.apply_progress(document_id, progress),
            )
            .await;

            match outcome {
                AnalysisOutcome::Finished { progress } => {
                    return self.finish_analysis(document_id, progress, false).await;
                }
                AnalysisOutcome::FinishedWithErrors { progress } => {
                    return self.finish_analysis(document_id, progress, true).await;
                }
                AnalysisOutcome::JobFailed { progress } => {
                    let message = progress
                        .message
                        .clone()
                        .unwrap_or_else(|| "the backend reported a failed analysis".to_string());
                    let stale = self.with_core(|core, events| {
                        if core.state.document_id.as_deref() != Some(document_id) {
                            return true;
                        }
                        core.state.is_processing = false;
                        events.push(EngineEvent::Message(core.log.resolve_loading(
                            MessageKind::System,
                            format!("Compliance analysis failed: {message}"),
                            Some(document_id),
                        )));
                        false
                    });
                    if stale {
                        return Ok(());
                    }
                    return Err(WorkflowError::BackendJobFailed(message));
                }
                AnalysisOutcome::NeedsComplianceStart => {
                    match self.inner.client.start_compliance(document_id).await {
                        Ok(ack) if ack.success => {
                            info!(document_id, "compliance engine started, resuming watch");
                            self.with_core(|core, events| {
                                if core.state.document_id.as_deref() != Some(document_id) {
                                    return;
                                }
                                events.push(EngineEvent::Message(core.log.push(
                                    MessageKind::System,
                                    "Compliance engine started, waiting for progress...",
                                    Some(document_id),
                                )));
                            });
                            continue;
                        }
                        Ok(ack) => {
                            let message = ack
                                .message
                                .unwrap_or_else(|| "the backend rejected the request".to_string());
                            self.fail_compliance_start(document_id, &message);
                            return Err(WorkflowError::BackendJobFailed(message));
                        }
                        Err(error) => {
                            self.fail_compliance_start(document_id, &error.to_string());
                            return Err(error.into());
                        }
                    }
                }
                AnalysisOutcome::Failed { error } => {
                    self.with_core(|core, events| {
                        if core.state.document_id.as_deref() != Some(document_id) {
                            return;
                        }
                        core.state.is_processing = false;
                        events.push(EngineEvent::Message(core.log.resolve_loading(
                            MessageKind::System,
                            format!("Compliance analysis polling failed: {error}"),
                            Some(document_id),
                        )));
                    });
                    return Err(error.into());
                }
                AnalysisOutcome::Cancelled => return Ok(()),
            }
        }
    }

    /// Exactly one narrated failure, and no watch restart.
    fn fail_compliance_start(&self, document_id: &str, message: &str) {
        self.with_core(|core, events| {
            if core.state.document_id.as_deref() != Some(document_id) {
                return;
            }
            core.state.is_processing = false;
            events.push(EngineEvent::Message(core.log.resolve_loading(
                MessageKind::System,
                format!("Could not start the compliance analysis: {message}"),
                Some(document_id),
            )));
        });
    }

    /// Fetch the full result payload once per completion; if that fetch
    /// fails, the last progress snapshot stands in as a degraded result
    /// instead of failing the whole workflow.
    async fn finish_analysis(
        &self,
        document_id: &str,
        progress: AnalysisProgress,
        with_errors: bool,
    ) -> Result<(), WorkflowError> {
        let results = match self.inner.client.analysis_results(document_id).await {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, document_id, "results fetch failed, using the progress snapshot");
                serde_json::to_value(&progress).unwrap_or(Value::Null)
            }
        };

        self.with_core(|core, events| {
            if core.state.document_id.as_deref() != Some(document_id) {
                return Ok(());
            }
            core.state.current_progress = Some(progress);
            core.state.analysis_results = Some(results);
            core.state.is_processing = false;
            core.state.move_to(Stage::Results)?;
            events.push(EngineEvent::StageChanged(Stage::Results));
            let text = if with_errors {
                "Compliance analysis completed with errors; results may be partial."
            } else {
                "Compliance analysis complete."
            };
            events.push(EngineEvent::Message(core.log.resolve_loading(
                MessageKind::System,
                text,
                Some(document_id),
            )));
            Ok(())
        })
    }

    /// Per-tick progress application with document-id revalidation: a
    /// snapshot from a superseded document is discarded, never applied.
    fn apply_progress(&self, document_id: &str, progress: &AnalysisProgress) {
        self.with_core(|core, events| {
            if core.state.document_id.as_deref() != Some(document_id) {
                return;
            }
            core.state.current_progress = Some(progress.clone());
            events.push(EngineEvent::Progress(progress.clone()));
        });
    }

    async fn reconcile_resumed(&self, document_id: &str, snapshot: StatusSnapshot) {
        let action = self.with_core(|core, events| {
            if core.state.document_id.as_deref() != Some(document_id) {
                return ResumeAction::None;
            }
            core.state.document_metadata.merge_from(&snapshot.metadata);
            if core.state.selected_framework.is_none() {
                core.state.selected_framework = snapshot.framework.clone();
            }
            if core.state.selected_standards().is_empty() && !snapshot.standards.is_empty() {
                core.state.set_standards(snapshot.standards.iter().cloned());
            }

            match snapshot.compliance_analysis {
                JobStatus::Completed | JobStatus::CompletedWithErrors => {
                    if core.state.analysis_results.is_some() {
                        core.state.reconcile_stage(Stage::Results);
                        events.push(EngineEvent::StageChanged(Stage::Results));
                        ResumeAction::None
                    } else {
                        ResumeAction::FetchResults {
                            with_errors: snapshot.compliance_analysis
                                == JobStatus::CompletedWithErrors,
                        }
                    }
                }
                JobStatus::Processing | JobStatus::FrameworkSelected => {
                    core.state.reconcile_stage(Stage::Analysis);
                    core.state.is_processing = true;
                    events.push(EngineEvent::StageChanged(Stage::Analysis));
                    events.push(EngineEvent::Message(core.log.push(
                        MessageKind::Loading,
                        "Analysis still running on the backend, resuming progress tracking...",
                        Some(document_id),
                    )));
                    ResumeAction::PollAnalysis
                }
                JobStatus::Failed => {
                    core.state.reconcile_stage(Stage::Analysis);
                    events.push(EngineEvent::StageChanged(Stage::Analysis));
                    events.push(EngineEvent::Message(core.log.push(
                        MessageKind::System,
                        format!(
                            "The analysis for this session failed on the backend: {}",
                            snapshot.message.as_deref().unwrap_or("no details provided")
                        ),
                        Some(document_id),
                    )));
                    ResumeAction::None
                }
                JobStatus::Pending | JobStatus::AwaitingFrameworkSelection | JobStatus::Unknown => {
                    if extraction_finished(&snapshot) {
                        core.state.reconcile_stage(Stage::FrameworkSelection);
                        events.push(EngineEvent::StageChanged(Stage::FrameworkSelection));
                        ResumeAction::None
                    } else {
                        core.state.reconcile_stage(Stage::Metadata);
                        core.state.is_processing = true;
                        events.push(EngineEvent::StageChanged(Stage::Metadata));
                        events.push(EngineEvent::Message(core.log.push(
                            MessageKind::Loading,
                            "Metadata extraction still running, resuming...",
                            Some(document_id),
                        )));
                        ResumeAction::PollMetadata
                    }
                }
            }
        });

        match action {
            ResumeAction::None => {}
            ResumeAction::FetchResults { with_errors } => {
                match self.inner.client.analysis_results(document_id).await {
                    Ok(payload) => {
                        self.with_core(|core, events| -> Result<(), WorkflowError> {
                            if core.state.document_id.as_deref() != Some(document_id) {
                                return Ok(());
                            }
                            core.state.analysis_results = Some(payload);
                            core.state.reconcile_stage(Stage::Results);
                            events.push(EngineEvent::StageChanged(Stage::Results));
                            let text = if with_errors {
                                "Analysis finished (with errors) while you were away; results \
                                 restored."
                            } else {
                                "Analysis finished while you were away; results restored."
                            };
                            events.push(EngineEvent::Message(core.log.push(
                                MessageKind::System,
                                text,
                                Some(document_id),
                            )));
                            Ok(())
                        })
                        .ok();
                    }
                    Err(error) => {
                        warn!(%error, document_id, "could not backfill results on resume");
                        self.with_core(|core, events| {
                            events.push(EngineEvent::Message(core.log.push(
                                MessageKind::System,
                                "Analysis finished on the backend but the results could not be \
                                 fetched; retry from the analysis step.",
                                Some(document_id),
                            )));
                        });
                    }
                }
            }
            ResumeAction::PollAnalysis => {
                let engine = self.clone();
                let document_id = document_id.to_string();
                tokio::spawn(async move {
                    if let Err(error) = engine.run_analysis_phase(&document_id).await {
                        warn!(%error, document_id, "resumed analysis watch ended with an error");
                    }
                });
            }
            ResumeAction::PollMetadata => {
                let engine = self.clone();
                let document_id = document_id.to_string();
                tokio::spawn(async move {
                    if let Err(error) = engine.run_metadata_phase(&document_id).await {
                        warn!(%error, document_id, "resumed metadata watch ended with an error");
                    }
                });
            }
        }
    }
}
