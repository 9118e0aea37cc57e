//! Conversation Model
//!
//! A document's message history as an immutable, versioned value. Every
//! change produces a new `Conversation` with the next version; the message
//! list itself is shared, so cloning a conversation is cheap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use marginalia_llm::Message;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub document_id: String,
    pub version: u64,
    messages: Arc<Vec<Message>>,
}

impl Conversation {
    /// An empty conversation at version 0
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            version: 0,
            messages: Arc::new(Vec::new()),
        }
    }

    /// Rebuild a conversation loaded from storage
    pub fn from_parts(document_id: impl Into<String>, version: u64, messages: Vec<Message>) -> Self {
        Self {
            document_id: document_id.into(),
            version,
            messages: Arc::new(messages),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Index of the last message, if any
    pub fn last_index(&self) -> Option<usize> {
        self.messages.len().checked_sub(1)
    }

    /// Next version with `messages` as the full history
    pub fn with_messages(&self, messages: Vec<Message>) -> Self {
        Self {
            document_id: self.document_id.clone(),
            version: self.version + 1,
            messages: Arc::new(messages),
        }
    }

    /// Next version with `extra` appended
    pub fn appended(&self, extra: impl IntoIterator<Item = Message>) -> Self {
        let mut messages = self.messages.as_ref().clone();
        messages.extend(extra);
        self.with_messages(messages)
    }

    /// Next version keeping only the first `len` messages
    pub fn truncated(&self, len: usize) -> Self {
        let keep = len.min(self.messages.len());
        self.with_messages(self.messages[..keep].to_vec())
    }
}
