//! Core domain types passed between the pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PageRecord / CorpusSnapshot
// ---------------------------------------------------------------------------

/// Structured text extracted from one fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Source URL the page was fetched from.
    pub url: String,
    /// Text of `h1`–`h6` elements, in document order.
    pub headings: Vec<String>,
    /// Text of `p` elements, in document order.
    pub paragraphs: Vec<String>,
    /// Text of `li` elements, in document order.
    pub list_items: Vec<String>,
}

impl PageRecord {
    /// True when the page yielded no text at all.
    pub fn is_empty(&self) -> bool {
        self.headings.is_empty() && self.paragraphs.is_empty() && self.list_items.is_empty()
    }
}

/// All page records gathered for a pipeline run, in configured URL order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub pages: Vec<PageRecord>,
    /// When the snapshot was assembled.
    pub built_at: DateTime<Utc>,
}

impl CorpusSnapshot {
    pub fn new(pages: Vec<PageRecord>) -> Self {
        Self {
            pages,
            built_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Age of the snapshot relative to `now`, clamped at zero.
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.built_at).num_seconds().max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// Relevance / answer
// ---------------------------------------------------------------------------

/// A fragment chosen by the relevance selector: usually a string, sometimes a
/// small object. Kept opaque.
pub type RelevantSnippet = serde_json::Value;

/// Ordered snippets chosen for a query. Empty means nothing relevant.
pub type RelevanceResult = Vec<RelevantSnippet>;

/// The three-step reply of the answer generator. Only `step3` is meant for
/// the end user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerTrace {
    pub step1: String,
    pub step2: String,
    pub step3: String,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// Pipeline stage a [`Diagnostic`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Selection,
    Headline,
}

/// A recovered failure, worded for direct display to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
