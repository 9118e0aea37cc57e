//! Data Models
//!
//! Contains the data structures shared by services and storage.

pub mod checkpoint;
pub mod conversation;
pub mod document;
pub mod settings;

pub use checkpoint::*;
pub use conversation::*;
pub use document::*;
pub use settings::*;
