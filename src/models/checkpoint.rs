//! Checkpoint Models
//!
//! Snapshots of a document's conversation that can be rewound to.

use serde::{Deserialize, Serialize};

/// A point in a document's history the user can return to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Unique checkpoint identifier (UUID)
    pub id: String,
    /// Document this checkpoint belongs to
    pub document_id: String,
    /// Index of the last conversation message covered by this checkpoint
    pub message_index: usize,
    /// Creation timestamp (ISO 8601)
    pub timestamp: String,
    /// Document content at checkpoint time
    pub content: String,
    /// Ids of the annotations visible at checkpoint time
    #[serde(default)]
    pub annotation_ids: Vec<String>,
}

impl Checkpoint {
    /// Create a new checkpoint with a fresh id and the current time
    pub fn new(
        document_id: impl Into<String>,
        message_index: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            message_index,
            timestamp: chrono::Utc::now().to_rfc3339(),
            content: content.into(),
            annotation_ids: Vec::new(),
        }
    }

    /// Set the annotation ids
    pub fn with_annotations(mut self, annotation_ids: Vec<String>) -> Self {
        self.annotation_ids = annotation_ids;
        self
    }
}

/// What a caller needs to re-render after a restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoredCheckpoint {
    pub checkpoint_id: String,
    pub content: String,
    pub annotation_ids: Vec<String>,
}

impl From<&Checkpoint> for RestoredCheckpoint {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            checkpoint_id: checkpoint.id.clone(),
            content: checkpoint.content.clone(),
            annotation_ids: checkpoint.annotation_ids.clone(),
        }
    }
}
