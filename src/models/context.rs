//! Foreground context as reported by a [`ContextSampler`](crate::sensing::ContextSampler).

use serde::{Deserialize, Serialize};

use super::session::AppIdentity;

/// One reading of the foreground application, window and (for browsers) tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    #[serde(flatten)]
    pub app: AppIdentity,
    #[serde(default)]
    pub window_title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tab_title: Option<String>,
    #[serde(default)]
    pub tab_count: Option<u32>,
    #[serde(default)]
    pub document_path: Option<String>,
    #[serde(default)]
    pub is_full_screen: bool,
    #[serde(default)]
    pub is_minimized: bool,
}

/// How a fresh snapshot differs from the context of the open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChange {
    /// Nothing that delimits a session changed.
    Unchanged,
    /// Only titles (window, tab or document) moved; subject to debounce.
    TitleOnly,
    /// Different app or URL; a session boundary right away.
    Switch,
}

impl ContextSnapshot {
    pub fn classify_change(&self, previous: &ContextSnapshot) -> ContextChange {
        if !self.app.same_app(&previous.app) || self.url != previous.url {
            return ContextChange::Switch;
        }

        if self.window_title != previous.window_title
            || self.tab_title != previous.tab_title
            || self.document_path != previous.document_path
        {
            return ContextChange::TitleOnly;
        }

        ContextChange::Unchanged
    }
}
