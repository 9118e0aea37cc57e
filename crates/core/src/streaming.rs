//! Unified Stream Event Types
//!
//! Provider-agnostic events produced while a streamed model response is
//! being read. Each provider protocol turns its raw stream lines (SSE or
//! NDJSON) into these events; consumers such as the block analyzer only
//! ever see this shape.

use serde::{Deserialize, Serialize};

/// Unified streaming event that every provider stream parser converts to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    /// Text content delta from the model
    TextDelta { content: String },

    /// Token usage information
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },

    /// Error reported inside the stream
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream complete
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl UnifiedStreamEvent {
    /// Text carried by a `TextDelta`, if this is one.
    pub fn text(&self) -> Option<&str> {
        match self {
            UnifiedStreamEvent::TextDelta { content } => Some(content.as_str()),
            _ => None,
        }
    }
}

/// Errors raised while converting a raw stream line into events.
#[derive(Debug, Clone)]
pub enum AdapterError {
    /// JSON/data parsing error
    ParseError(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::ParseError(err.to_string())
    }
}
