//! Marginalia Tools
//!
//! The tools a model can call while annotating a document:
//! - `annotate` - attach reference records to an exact text span
//! - `extendList` - suggest continuations for a list
//! - `getNoteContent` - read the full document on demand
//!
//! `ToolTable` dispatches calls by name; results accumulate in a
//! `ToolContext` scoped to one analysis call.

pub mod annotation;
pub mod definitions;
pub mod dispatch;
pub mod executor;

// Re-export core types
pub use annotation::{clean_text_span, AnnotationResult, ReferenceRecord};
pub use definitions::{annotation_tools, ANNOTATE, EXTEND_LIST, GET_NOTE_CONTENT};
pub use dispatch::{ToolContext, ToolEntry, ToolTable};
pub use executor::ToolResult;
