//! LLM Provider Trait
//!
//! Defines the single call contract the orchestrator talks to.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ToolDefinition};
use marginalia_core::streaming::UnifiedStreamEvent;

/// Trait every model backend implements.
///
/// `HttpProvider` is the production implementation; tests substitute
/// scripted doubles.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the protocol name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Send a message and get a complete response.
    ///
    /// If `request_options.cancellation_token` fires before the response
    /// arrives, the call resolves to `LlmError::Cancelled`.
    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Stream a message response via a channel.
    ///
    /// Text deltas are forwarded to `tx` as they arrive; the assembled
    /// response is returned once the stream ends.
    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;
}

/// Race `fut` against an optional cancellation token.
///
/// A token that has already fired short-circuits without polling `fut`.
pub async fn with_cancellation<F, T>(token: Option<&CancellationToken>, fut: F) -> LlmResult<T>
where
    F: Future<Output = LlmResult<T>>,
{
    match token {
        Some(token) => {
            if token.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(LlmError::Cancelled),
                result = fut => result,
            }
        }
        None => fut.await,
    }
}

/// Reject a response with neither content nor tool calls when no tools
/// were offered.
pub fn ensure_not_empty(response: LlmResponse, tools_requested: bool) -> LlmResult<LlmResponse> {
    if !tools_requested && response.is_empty() {
        return Err(LlmError::EmptyResponse {
            model: response.model,
        });
    }
    Ok(response)
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
