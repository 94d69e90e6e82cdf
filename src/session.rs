//! Per-browser-session UI state for the `serve` front end.
//!
//! Sessions live in memory only. Model calls run outside the store's lock;
//! handlers commit the result afterwards through [`SessionStore::update`].

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use time::{Duration, OffsetDateTime, format_description};
use tracing::debug;
use uuid::Uuid;

use crate::label::RenderedLabel;
use crate::parser::ParsedListing;
use crate::providers::ProviderUsage;

const IDLE_SESSION_TTL: Duration = Duration::hours(12);

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRecord {
    pub result: ParsedListing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationRecord {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub extraction: Option<ExtractionRecord>,
    /// Earlier extraction results, most recent last.
    pub extraction_history: Vec<ExtractionRecord>,
    pub translation: Option<TranslationRecord>,
    pub label: Option<RenderedLabel>,
    pub notice: Option<String>,
}

impl SessionState {
    /// Replaces the current extraction and keeps the previous one for undo.
    pub fn set_extraction(&mut self, record: ExtractionRecord, history_limit: usize) {
        self.notice = match &record.result {
            ParsedListing::Raw { text } if text.is_empty() => {
                Some("The model returned no text.".to_string())
            }
            ParsedListing::Raw { .. } => {
                Some("Format not recognised; showing the raw model output.".to_string())
            }
            ParsedListing::Structured(_) => None,
        };
        if let Some(previous) = self.extraction.replace(record) {
            self.extraction_history.push(previous);
            let overflow = self.extraction_history.len().saturating_sub(history_limit);
            if overflow > 0 {
                self.extraction_history.drain(..overflow);
            }
        }
    }

    /// Restores the previous extraction. Returns `false` when there is none.
    pub fn undo_extraction(&mut self) -> bool {
        match self.extraction_history.pop() {
            Some(previous) => {
                self.extraction = Some(previous);
                self.notice = None;
                true
            }
            None => false,
        }
    }

    pub fn set_translation(&mut self, record: TranslationRecord) {
        self.translation = Some(record);
    }

    pub fn set_label(&mut self, label: RenderedLabel) {
        self.label = Some(label);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelSummary {
    pub sku: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: String,
    pub extraction: Option<ExtractionRecord>,
    pub history_depth: usize,
    pub translation: Option<TranslationRecord>,
    pub label: Option<LabelSummary>,
    pub notice: Option<String>,
}

struct SessionEntry {
    created_at: OffsetDateTime,
    last_seen: OffsetDateTime,
    state: SessionState,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    history_limit: usize,
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn create(&self) -> String {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4().simple().to_string();

        let mut sessions = self.lock();
        sessions.retain(|_, entry| now - entry.last_seen < IDLE_SESSION_TTL);
        sessions.insert(
            id.clone(),
            SessionEntry {
                created_at: now,
                last_seen: now,
                state: SessionState::default(),
            },
        );
        debug!("session {} created ({} active)", id, sessions.len());
        id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Runs `apply` on the session state; `None` when the session is unknown.
    pub fn update<R>(&self, id: &str, apply: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(id)?;
        entry.last_seen = OffsetDateTime::now_utc();
        Some(apply(&mut entry.state))
    }

    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        let sessions = self.lock();
        let entry = sessions.get(id)?;
        let state = &entry.state;
        Some(SessionSnapshot {
            session_id: id.to_string(),
            created_at: entry
                .created_at
                .format(&format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "unknown".to_string()),
            extraction: state.extraction.clone(),
            history_depth: state.extraction_history.len(),
            translation: state.translation.clone(),
            label: state.label.as_ref().map(|label| LabelSummary {
                sku: label.spec.sku.trim().to_string(),
                width: label.width,
                height: label.height,
            }),
            notice: state.notice.clone(),
        })
    }

    pub fn label(&self, id: &str) -> Option<Option<RenderedLabel>> {
        self.lock().get(id).map(|entry| entry.state.label.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
