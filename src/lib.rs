//! Marginalia
//!
//! Turns free-form notes into structured marginal annotations using a
//! language model. It includes:
//! - A multi-turn tool-calling analyzer with per-document conversations
//! - A one-shot block mode that streams per-block results
//! - JSON repair for imperfect model output
//! - Checkpoints for rewinding a conversation
//! - Storage (SQLite, JSON config) and the `marginalia` CLI

pub mod cli;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::settings::{AnalyzerConfig, AppConfig, PersistenceConfig};
pub use services::{
    AnalysisOutcome, AnalysisRequest, Analyzer, BlockAnalysisOutcome, BlockAnalyzer,
    BlockAnnotations, CheckpointManager,
};
pub use utils::error::{AppError, AppResult};
