//! Data model shared by the crawler, the checkpoint writer and the EPUB assembler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Editor sentinel used when a page carries no "Edited:" line.
pub const UNKNOWN_EDITOR: &str = "Unknown";

/// Title used when neither the navigation title nor any heading is present.
pub const UNKNOWN_TITLE: &str = "Unknown Chapter";

/// One extracted chapter, bound to the URL it was fetched from.
///
/// `body_paragraphs` is never empty for a chapter the crawler stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub source_url: String,
    /// Index parsed from the `chapter-<n>` URL token, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u64>,
    pub title: String,
    pub edited_by: String,
    pub body_paragraphs: Vec<String>,
}

impl Chapter {
    /// Editor attribution to render, or `None` for the sentinel.
    pub fn attribution(&self) -> Option<&str> {
        let editor = self.edited_by.trim();
        if editor.is_empty() || editor == UNKNOWN_EDITOR {
            None
        } else {
            Some(editor)
        }
    }
}

/// E-book metadata attached to every document build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelInfo {
    pub title: String,
    pub author: String,
    pub language: String,
    /// Stable identifier (`dc:identifier`); the start URL unless configured otherwise.
    pub identifier: String,
}

impl NovelInfo {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            title: "Web Novel".to_string(),
            author: UNKNOWN_EDITOR.to_string(),
            language: "en".to_string(),
            identifier: identifier.into(),
        }
    }
}

/// Persisted snapshot of every chapter fetched so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub timestamp: DateTime<Utc>,
    pub chapter_count: usize,
    pub chapters: Vec<Chapter>,
}

impl CheckpointRecord {
    pub fn new(chapters: &[Chapter]) -> Self {
        Self {
            timestamp: Utc::now(),
            chapter_count: chapters.len(),
            chapters: chapters.to_vec(),
        }
    }
}
