//! Model Response Handling
//!
//! Coercing raw model text into JSON, and extracting per-block results from
//! a response that is still streaming in.

pub mod block_extractor;
pub mod parser;
pub mod repair;

pub use block_extractor::{BlockExtractor, CompletedBlock};
pub use parser::{parse_json_response, strip_code_fences};
pub use repair::repair_json;
