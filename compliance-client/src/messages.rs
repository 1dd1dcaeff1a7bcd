//! Append-only narration log.
//!
//! Watchers and the engine narrate workflow progress here; sessions persist
//! the entries and the UI replays them. Entries are immutable once appended,
//! with one exception: a trailing `Loading` entry may be replaced in place
//! by its terminal outcome so intermediate "working..." messages do not
//! linger in the history.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
    Loading,
    Component,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntry {
    /// Unique, monotonically increasing within a session.
    pub id: u64,
    pub kind: MessageKind,
    pub content: String,
    pub document_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Default)]
pub struct MessageLog {
    next_id: u64,
    entries: Vec<MessageEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries, resuming the id counter past
    /// the largest persisted id.
    pub fn from_entries(entries: Vec<MessageEntry>) -> Self {
        let next_id = entries.iter().map(|e| e.id + 1).max().unwrap_or(0);
        Self { next_id, entries }
    }

    pub fn push(
        &mut self,
        kind: MessageKind,
        content: impl Into<String>,
        document_id: Option<&str>,
    ) -> MessageEntry {
        self.push_with_metadata(kind, content, document_id, Value::Null)
    }

    pub fn push_with_metadata(
        &mut self,
        kind: MessageKind,
        content: impl Into<String>,
        document_id: Option<&str>,
        metadata: Value,
    ) -> MessageEntry {
        let entry = MessageEntry {
            id: self.next_id,
            kind,
            content: content.into(),
            document_id: document_id.map(str::to_string),
            metadata,
            created_at: Local::now(),
        };
        self.next_id += 1;
        self.entries.push(entry.clone());
        entry
    }

    /// Replace a trailing `Loading` entry with its terminal outcome,
    /// keeping the entry id. Appends normally when the last entry is not a
    /// loading placeholder.
    pub fn resolve_loading(
        &mut self,
        kind: MessageKind,
        content: impl Into<String>,
        document_id: Option<&str>,
    ) -> MessageEntry {
        if let Some(last) = self.entries.last_mut() {
            if last.kind == MessageKind::Loading {
                last.kind = kind;
                last.content = content.into();
                last.created_at = Local::now();
                if let Some(doc) = document_id {
                    last.document_id = Some(doc.to_string());
                }
                return last.clone();
            }
        }
        self.push(kind, content, document_id)
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&MessageEntry> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let mut log = MessageLog::new();
        let a = log.push(MessageKind::User, "upload report.pdf", None);
        let b = log.push(MessageKind::System, "uploading", Some("D1"));
        assert!(b.id > a.id);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_resolve_loading_replaces_in_place() {
        let mut log = MessageLog::new();
        log.push(MessageKind::User, "analyze", None);
        let loading = log.push(MessageKind::Loading, "Analyzing...", Some("D1"));
        let resolved = log.resolve_loading(MessageKind::System, "Analysis complete", Some("D1"));

        assert_eq!(log.len(), 2);
        assert_eq!(resolved.id, loading.id);
        assert_eq!(log.last().unwrap().kind, MessageKind::System);
        assert_eq!(log.last().unwrap().content, "Analysis complete");
    }

    #[test]
    fn test_resolve_loading_appends_when_no_placeholder() {
        let mut log = MessageLog::new();
        log.push(MessageKind::System, "hello", None);
        log.resolve_loading(MessageKind::System, "done", None);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_only_trailing_loading_is_replaceable() {
        let mut log = MessageLog::new();
        log.push(MessageKind::Loading, "step 1...", None);
        log.push(MessageKind::System, "interjection", None);
        log.resolve_loading(MessageKind::System, "step 1 done", None);
        // the stale loading entry earlier in the log is left alone
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[0].kind, MessageKind::Loading);
    }

    #[test]
    fn test_from_entries_resumes_id_counter() {
        let mut log = MessageLog::new();
        log.push(MessageKind::User, "one", None);
        log.push_with_metadata(MessageKind::Component, "two", None, json!({"k": 1}));
        let persisted = log.entries().to_vec();

        let mut restored = MessageLog::from_entries(persisted);
        let next = restored.push(MessageKind::System, "three", None);
        assert_eq!(next.id, 2);
        assert_eq!(restored.len(), 3);
    }
}
