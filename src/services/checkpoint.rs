//! Checkpoint Manager
//!
//! Per-document, append-only list of conversation checkpoints. Restoring a
//! checkpoint rewinds the conversation through a caller-supplied callback
//! and discards every checkpoint created after it.
//!
//! When checkpoints are disabled every operation is a no-op returning an
//! empty result. Enabled managers always keep checkpoints in memory and,
//! with a store attached, in the database as well.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::checkpoint::{Checkpoint, RestoredCheckpoint};
use crate::models::settings::PersistenceConfig;
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Default)]
struct DocumentCheckpoints {
    /// Oldest first
    checkpoints: Vec<Checkpoint>,
    current: Option<String>,
}

/// Checkpoint storage keyed by document id
#[derive(Debug)]
pub struct CheckpointManager {
    enabled: bool,
    store: Option<Database>,
    documents: Mutex<HashMap<String, DocumentCheckpoints>>,
}

impl CheckpointManager {
    /// A manager that records nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            store: None,
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// An enabled manager without durability
    pub fn in_memory() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    /// An enabled manager that also writes to `store`
    pub fn with_store(store: Database) -> Self {
        Self {
            enabled: true,
            store: Some(store),
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the persistence flags
    pub fn from_config(persistence: &PersistenceConfig, store: Option<Database>) -> Self {
        match (persistence.checkpoints, store) {
            (false, _) => Self::disabled(),
            (true, Some(store)) => Self::with_store(store),
            (true, None) => Self::in_memory(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, DocumentCheckpoints>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The document's entry, loaded from the store on first use.
    fn entry<'s>(
        &self,
        documents: &'s mut HashMap<String, DocumentCheckpoints>,
        document_id: &str,
    ) -> AppResult<&'s mut DocumentCheckpoints> {
        if !documents.contains_key(document_id) {
            let checkpoints = match &self.store {
                Some(store) => store.list_checkpoints(document_id)?,
                None => Vec::new(),
            };
            let current = checkpoints.last().map(|c| c.id.clone());
            documents.insert(
                document_id.to_string(),
                DocumentCheckpoints {
                    checkpoints,
                    current,
                },
            );
        }
        documents
            .get_mut(document_id)
            .ok_or_else(|| AppError::internal("checkpoint entry missing after insert"))
    }

    /// Append a checkpoint and make it current.
    pub fn create(
        &self,
        document_id: &str,
        message_index: usize,
        content: impl Into<String>,
        annotation_ids: Vec<String>,
    ) -> AppResult<Option<Checkpoint>> {
        if !self.enabled {
            return Ok(None);
        }

        let checkpoint =
            Checkpoint::new(document_id, message_index, content).with_annotations(annotation_ids);
        if let Some(store) = &self.store {
            store.insert_checkpoint(&checkpoint)?;
        }

        let mut documents = self.documents();
        let entry = self.entry(&mut documents, document_id)?;
        // A freshly loaded entry already holds the row just inserted
        if !entry.checkpoints.iter().any(|c| c.id == checkpoint.id) {
            entry.checkpoints.push(checkpoint.clone());
        }
        entry.current = Some(checkpoint.id.clone());

        tracing::debug!(
            document_id = %document_id,
            checkpoint_id = %checkpoint.id,
            message_index,
            "Checkpoint created"
        );
        Ok(Some(checkpoint))
    }

    /// Rewind to a checkpoint.
    ///
    /// `truncate` receives the checkpoint's message index and must cut the
    /// conversation down to `message_index + 1` messages. Later checkpoints
    /// are discarded only after it succeeds.
    pub fn restore<F>(
        &self,
        document_id: &str,
        checkpoint_id: &str,
        truncate: F,
    ) -> AppResult<Option<RestoredCheckpoint>>
    where
        F: FnOnce(usize) -> AppResult<()>,
    {
        if !self.enabled {
            return Ok(None);
        }

        let target = {
            let mut documents = self.documents();
            let entry = self.entry(&mut documents, document_id)?;
            entry
                .checkpoints
                .iter()
                .find(|c| c.id == checkpoint_id)
                .cloned()
                .ok_or_else(|| {
                    AppError::not_found(format!(
                        "Checkpoint {} for document {}",
                        checkpoint_id, document_id
                    ))
                })?
        };

        truncate(target.message_index)?;

        if let Some(store) = &self.store {
            store.delete_checkpoints_after(document_id, checkpoint_id)?;
        }

        let mut documents = self.documents();
        let entry = self.entry(&mut documents, document_id)?;
        let before = entry.checkpoints.len();
        if let Some(pos) = entry.checkpoints.iter().position(|c| c.id == checkpoint_id) {
            entry.checkpoints.truncate(pos + 1);
        }
        entry.current = Some(target.id.clone());

        tracing::info!(
            document_id = %document_id,
            checkpoint_id = %checkpoint_id,
            message_index = target.message_index,
            discarded = before - entry.checkpoints.len(),
            "Checkpoint restored"
        );
        Ok(Some(RestoredCheckpoint::from(&target)))
    }

    /// All checkpoints of a document, oldest first
    pub fn list(&self, document_id: &str) -> AppResult<Vec<Checkpoint>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let mut documents = self.documents();
        Ok(self.entry(&mut documents, document_id)?.checkpoints.clone())
    }

    /// The most recently created or restored checkpoint
    pub fn current(&self, document_id: &str) -> AppResult<Option<Checkpoint>> {
        if !self.enabled {
            return Ok(None);
        }
        let mut documents = self.documents();
        let entry = self.entry(&mut documents, document_id)?;
        Ok(entry.current.as_ref().and_then(|id| {
            entry.checkpoints.iter().find(|c| &c.id == id).cloned()
        }))
    }

    /// Remove every checkpoint of a document
    pub fn clear(&self, document_id: &str) -> AppResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.delete_checkpoints(document_id)?;
        }
        self.documents().insert(
            document_id.to_string(),
            DocumentCheckpoints::default(),
        );
        Ok(())
    }
}
