//! Annotation Results
//!
//! What the annotation tools produce. `text_span` is the anchor the editor
//! searches for verbatim, so it is only ever trimmed, never rewritten.

use serde::{Deserialize, Serialize};

/// Punctuation stripped from either end of a text span
const SPAN_PUNCTUATION: &[char] = &['.', ',', ':', ';', '!', '?'];

/// One suggested source for a reference annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub description: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub search_query: String,
}

/// A structured annotation anchored to an exact substring of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnnotationResult {
    Reference {
        #[serde(rename = "textSpan")]
        text_span: String,
        records: Vec<ReferenceRecord>,
    },
    List {
        #[serde(rename = "textSpan")]
        text_span: String,
        extensions: Vec<String>,
    },
}

impl AnnotationResult {
    pub fn text_span(&self) -> &str {
        match self {
            AnnotationResult::Reference { text_span, .. } => text_span,
            AnnotationResult::List { text_span, .. } => text_span,
        }
    }

    /// Apply `clean_text_span` to the span; `None` if nothing is left.
    pub fn cleaned(mut self) -> Option<Self> {
        let span = match &mut self {
            AnnotationResult::Reference { text_span, .. } => text_span,
            AnnotationResult::List { text_span, .. } => text_span,
        };
        *span = clean_text_span(span);
        if span.is_empty() {
            return None;
        }
        Some(self)
    }
}

/// Trim a span and strip one run of leading and trailing punctuation.
///
/// Returns an empty string when nothing but whitespace and punctuation is left.
pub fn clean_text_span(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(SPAN_PUNCTUATION)
        .trim_end_matches(SPAN_PUNCTUATION)
        .trim()
        .to_string()
}
