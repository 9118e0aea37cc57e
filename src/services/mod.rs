//! Services
//!
//! Business logic: the tool-calling analyzer, one-shot block analysis,
//! checkpoints, and model response parsing.

pub mod analyzer;
pub mod block_analysis;
pub mod checkpoint;
pub mod response;

pub use analyzer::{AnalysisOutcome, AnalysisRequest, Analyzer};
pub use block_analysis::{BlockAnalysisOutcome, BlockAnalyzer, BlockAnnotations};
pub use checkpoint::CheckpointManager;
