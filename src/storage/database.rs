//! SQLite Database
//!
//! Embedded database for persistent storage using rusqlite with r2d2 connection pooling.
//! Holds two keyed stores: document id -> conversation, and document id ->
//! ordered checkpoints.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::models::checkpoint::Checkpoint;
use crate::models::conversation::Conversation;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;
use marginalia_llm::Message;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl Database {
    /// Create an in-memory database for testing.
    ///
    /// Uses an in-memory SQLite database with the same schema as the
    /// production database.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open the database at ~/.marginalia/data.db
    pub fn new() -> AppResult<Self> {
        Self::open(&database_path()?)
    }

    /// Open (or create) a database file at `db_path`
    pub fn open(db_path: &Path) -> AppResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                document_id TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                message_index INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                content TEXT NOT NULL,
                annotation_ids TEXT NOT NULL DEFAULT '[]'
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_document
             ON checkpoints(document_id, seq)",
            [],
        )?;

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Insert or replace a document's conversation
    pub fn save_conversation(&self, conversation: &Conversation) -> AppResult<()> {
        let conn = self.get_connection()?;
        let messages = serde_json::to_string(conversation.messages())?;
        conn.execute(
            "INSERT INTO conversations (document_id, messages, version, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(document_id) DO UPDATE SET
                messages = excluded.messages,
                version = excluded.version,
                updated_at = CURRENT_TIMESTAMP",
            params![
                conversation.document_id,
                messages,
                conversation.version as i64
            ],
        )?;
        Ok(())
    }

    /// Load a document's conversation, if one was saved
    pub fn load_conversation(&self, document_id: &str) -> AppResult<Option<Conversation>> {
        let conn = self.get_connection()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT messages, version FROM conversations WHERE document_id = ?1",
                params![document_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((messages, version)) => {
                let messages: Vec<Message> = serde_json::from_str(&messages)?;
                Ok(Some(Conversation::from_parts(
                    document_id,
                    version.max(0) as u64,
                    messages,
                )))
            }
            None => Ok(None),
        }
    }

    /// Delete a document's conversation
    pub fn delete_conversation(&self, document_id: &str) -> AppResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "DELETE FROM conversations WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Append a checkpoint; its position is one past the document's last
    pub fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> AppResult<()> {
        let conn = self.get_connection()?;
        let annotation_ids = serde_json::to_string(&checkpoint.annotation_ids)?;
        conn.execute(
            "INSERT INTO checkpoints
                (id, document_id, seq, message_index, timestamp, content, annotation_ids)
             VALUES (
                ?1, ?2,
                (SELECT COALESCE(MAX(seq), -1) + 1 FROM checkpoints WHERE document_id = ?2),
                ?3, ?4, ?5, ?6
             )",
            params![
                checkpoint.id,
                checkpoint.document_id,
                checkpoint.message_index as i64,
                checkpoint.timestamp,
                checkpoint.content,
                annotation_ids
            ],
        )?;
        Ok(())
    }

    /// All checkpoints of a document, oldest first
    pub fn list_checkpoints(&self, document_id: &str) -> AppResult<Vec<Checkpoint>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, message_index, timestamp, content, annotation_ids
             FROM checkpoints WHERE document_id = ?1 ORDER BY seq ASC",
        )?;

        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, document_id, message_index, timestamp, content, annotation_ids)|
                 -> AppResult<Checkpoint> {
                    Ok(Checkpoint {
                        id,
                        document_id,
                        message_index: message_index.max(0) as usize,
                        timestamp,
                        content,
                        annotation_ids: serde_json::from_str(&annotation_ids)?,
                    })
                },
            )
            .collect()
    }

    /// Delete every checkpoint of a document created after `checkpoint_id`
    pub fn delete_checkpoints_after(&self, document_id: &str, checkpoint_id: &str) -> AppResult<usize> {
        let conn = self.get_connection()?;
        let removed = conn.execute(
            "DELETE FROM checkpoints
             WHERE document_id = ?1
               AND seq > (SELECT seq FROM checkpoints WHERE id = ?2 AND document_id = ?1)",
            params![document_id, checkpoint_id],
        )?;
        Ok(removed)
    }

    /// Delete all checkpoints of a document
    pub fn delete_checkpoints(&self, document_id: &str) -> AppResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(())
    }
}
