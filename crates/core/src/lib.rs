//! Marginalia Core
//!
//! Foundational types shared by every crate in the Marginalia workspace.
//! This crate has no dependencies on provider, storage or application code.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `streaming` - Unified stream event types produced by provider stream parsers

pub mod error;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, UnifiedStreamEvent};
