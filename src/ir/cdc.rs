//! Change-capture configuration.

use serde::Serialize;

use super::CdcEvent;

/// Handler variant of a change-capture declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CdcKind {
    /// Create or update exactly one related target record.
    Enricher { target_model_name: String },
    /// Recompute an aggregate target from every matching source. With
    /// `multi`, the source's grouping key may move, and both the old and
    /// the new bucket are recomputed.
    Reducer { target_model_name: String, multi: bool },
    /// Arbitrary side effects.
    Trigger,
}

/// One change-capture declaration on a source model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeDataCaptureConfig {
    pub source_model_name: String,
    pub event: CdcEvent,
    /// Name the host registers the handler implementation under.
    pub handler: String,
    pub readable_tables: Vec<String>,
    pub writable_tables: Vec<String>,
    pub kind: CdcKind,
}

impl ChangeDataCaptureConfig {
    /// Queue-routing identity: unique per (source, handler).
    pub fn handler_id(&self) -> String {
        format!("{}:{}", self.source_model_name, self.handler)
    }

    pub fn target_model_name(&self) -> Option<&str> {
        match &self.kind {
            CdcKind::Enricher { target_model_name }
            | CdcKind::Reducer {
                target_model_name, ..
            } => Some(target_model_name),
            CdcKind::Trigger => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            CdcKind::Enricher { .. } => "ENRICHER",
            CdcKind::Reducer { multi: false, .. } => "REDUCER",
            CdcKind::Reducer { multi: true, .. } => "MULTI_REDUCER",
            CdcKind::Trigger => "TRIGGER",
        }
    }
}
