//! Marginalia LLM
//!
//! Provides a single call contract over several vendor protocols:
//! - OpenAI Chat Completions (and any OpenAI-compatible endpoint)
//! - Anthropic Messages
//! - Ollama native chat (local inference)
//!
//! Vendors are not separate provider types. Each one is a `ProviderProtocol`
//! entry in a dispatch table, and `HttpProvider` drives whichever entry the
//! configured `ProviderType` selects.

pub mod anthropic;
pub mod client;
pub mod http_client;
pub mod ollama;
pub mod openai;
pub mod protocol;
pub mod provider;
pub mod types;

// Re-export main types
pub use client::HttpProvider;
pub use http_client::build_http_client;
pub use protocol::{protocol_for, ProviderProtocol, RequestContext};
pub use provider::LlmProvider;
pub use types::*;
