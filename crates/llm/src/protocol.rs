//! Provider Protocol Table
//!
//! Each vendor wire format is a table of plain functions. `HttpProvider`
//! looks up the entry for its configured `ProviderType` once and drives
//! every call through it, so adding a vendor means adding one static
//! `ProviderProtocol`, not a new provider type.

use marginalia_core::streaming::{AdapterError, UnifiedStreamEvent};

use crate::types::{
    LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, ProviderType,
    ToolDefinition,
};

/// Everything a request builder needs for one call.
pub struct RequestContext<'a> {
    pub config: &'a ProviderConfig,
    pub messages: &'a [Message],
    pub system: Option<&'a str>,
    pub tools: &'a [ToolDefinition],
    pub options: &'a LlmRequestOptions,
    pub stream: bool,
}

/// Dispatch entry for one vendor protocol.
pub struct ProviderProtocol {
    /// Name used in logs and error messages
    pub name: &'static str,
    /// Endpoint used when the config has no `base_url`
    pub default_endpoint: &'static str,
    /// Whether calls fail fast without an API key
    pub requires_api_key: bool,
    /// Build the JSON request body
    pub build_request: fn(&RequestContext<'_>) -> serde_json::Value,
    /// Parse a complete (non-streamed) response body
    pub parse_response: fn(&str) -> LlmResult<LlmResponse>,
    /// Turn one raw stream line into unified events
    pub parse_stream_line: fn(&str) -> Result<Vec<UnifiedStreamEvent>, AdapterError>,
    /// Authentication and version headers
    pub auth_headers: fn(Option<&str>) -> Vec<(&'static str, String)>,
}

impl ProviderProtocol {
    /// Resolve the endpoint for a config, preferring its override.
    pub fn endpoint<'a>(&'a self, config: &'a ProviderConfig) -> &'a str {
        config.base_url.as_deref().unwrap_or(self.default_endpoint)
    }
}

/// Look up the protocol entry for a provider type.
pub fn protocol_for(provider: ProviderType) -> &'static ProviderProtocol {
    match provider {
        ProviderType::OpenAI => &crate::openai::PROTOCOL,
        ProviderType::Anthropic => &crate::anthropic::PROTOCOL,
        ProviderType::Ollama => &crate::ollama::PROTOCOL,
    }
}

/// Strip the SSE `data:` prefix. Returns `None` for comments, event names,
/// blank lines and the `[DONE]` sentinel.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Splits a byte stream into lines.
///
/// Bytes are held until a newline arrives, so a multi-byte character split
/// across network chunks is decoded whole.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The unterminated last line, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&rest).into_owned();
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}
