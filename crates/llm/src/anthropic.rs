//! Anthropic Protocol
//!
//! Messages API wire format. The system prompt travels outside the message
//! list, tool calls are `tool_use` content blocks, and tool responses are
//! `tool_result` blocks inside a user message. Consecutive tool responses
//! are merged into one user message because the API requires all results
//! of a turn in the message right after the `tool_use` turn.

use serde::Deserialize;

use super::protocol::{sse_data, ProviderProtocol, RequestContext};
use super::types::{
    FinishReason, LlmError, LlmResponse, LlmResult, Message, MessageRole, ToolCall,
    ToolDefinition, UsageStats,
};
use marginalia_core::streaming::{AdapterError, UnifiedStreamEvent};

/// Default Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub static PROTOCOL: ProviderProtocol = ProviderProtocol {
    name: "anthropic",
    default_endpoint: ANTHROPIC_API_URL,
    requires_api_key: true,
    build_request,
    parse_response,
    parse_stream_line,
    auth_headers,
};

fn auth_headers(api_key: Option<&str>) -> Vec<(&'static str, String)> {
    let mut headers = vec![("anthropic-version", ANTHROPIC_VERSION.to_string())];
    if let Some(key) = api_key {
        headers.push(("x-api-key", key.to_string()));
    }
    headers
}

/// Build the request body for the API.
///
/// `response_format` and `reasoning_effort` have no Messages API
/// equivalent and are dropped.
fn build_request(ctx: &RequestContext<'_>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": ctx.config.model,
        "max_tokens": ctx.config.max_tokens,
        "stream": ctx.stream,
        "temperature": ctx.options.temperature,
    });

    // System messages inside the history are folded into the system field
    let mut system_parts: Vec<&str> = ctx.system.into_iter().collect();
    system_parts.extend(
        ctx.messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.text_content()),
    );
    if !system_parts.is_empty() {
        body["system"] = serde_json::json!(system_parts.join("\n\n"));
    }

    body["messages"] = serde_json::json!(messages_to_claude(ctx.messages));

    if !ctx.tools.is_empty() {
        let claude_tools: Vec<serde_json::Value> = ctx.tools.iter().map(tool_to_claude).collect();
        body["tools"] = serde_json::json!(claude_tools);
    }

    body
}

/// Convert the history, merging runs of tool responses into one user turn
fn messages_to_claude(messages: &[Message]) -> Vec<serde_json::Value> {
    let mut out: Vec<serde_json::Value> = Vec::new();
    let mut pending_results: Vec<serde_json::Value> = Vec::new();

    for message in messages {
        if message.role == MessageRole::Tool {
            pending_results.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id,
                "content": message.text_content()
            }));
            continue;
        }

        if !pending_results.is_empty() {
            out.push(serde_json::json!({
                "role": "user",
                "content": std::mem::take(&mut pending_results)
            }));
        }

        match message.role {
            MessageRole::System => {}
            MessageRole::Assistant if message.has_tool_calls() => {
                let mut content: Vec<serde_json::Value> = Vec::new();
                if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
                    content.push(serde_json::json!({ "type": "text", "text": text }));
                }
                for tc in &message.tool_calls {
                    let input = tc
                        .parsed_arguments()
                        .unwrap_or_else(|_| serde_json::json!({}));
                    content.push(serde_json::json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": input
                    }));
                }
                out.push(serde_json::json!({ "role": "assistant", "content": content }));
            }
            role => {
                let role = if role == MessageRole::Assistant {
                    "assistant"
                } else {
                    "user"
                };
                out.push(serde_json::json!({
                    "role": role,
                    "content": [{ "type": "text", "text": message.text_content() }]
                }));
            }
        }
    }

    if !pending_results.is_empty() {
        out.push(serde_json::json!({
            "role": "user",
            "content": pending_results
        }));
    }

    out
}

/// Convert a ToolDefinition to Claude API format
fn tool_to_claude(tool: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema
    })
}

/// Parse a response from Claude API
fn parse_response(body: &str) -> LlmResult<LlmResponse> {
    let response: ClaudeResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ParseError {
            message: format!("Failed to parse response: {}", e),
        })?;

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input.to_string()));
            }
            ContentBlock::Other => {}
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        response
            .stop_reason
            .as_deref()
            .map(FinishReason::from)
            .unwrap_or(FinishReason::Stop)
    } else {
        FinishReason::ToolCalls
    };

    Ok(LlmResponse {
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join(""))
        },
        tool_calls,
        finish_reason,
        usage: UsageStats {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
        model: response.model,
    })
}

/// Parse one SSE line from a streamed message
fn parse_stream_line(line: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
    let Some(data) = sse_data(line) else {
        return Ok(Vec::new());
    };

    let event: ClaudeStreamEvent = serde_json::from_str(data)?;

    let events = match event {
        ClaudeStreamEvent::MessageStart { message } => match message.usage {
            Some(usage) => vec![UnifiedStreamEvent::Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            }],
            None => vec![],
        },
        ClaudeStreamEvent::ContentBlockDelta { delta } => match delta {
            Delta::TextDelta { text } => vec![UnifiedStreamEvent::TextDelta { content: text }],
            Delta::Other => vec![],
        },
        ClaudeStreamEvent::MessageDelta { delta, usage } => {
            let mut events = vec![];
            if let Some(u) = usage {
                events.push(UnifiedStreamEvent::Usage {
                    input_tokens: 0,
                    output_tokens: u.output_tokens,
                });
            }
            if delta.stop_reason.is_some() {
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: delta.stop_reason,
                });
            }
            events
        }
        ClaudeStreamEvent::Error { error } => vec![UnifiedStreamEvent::Error {
            message: error.message,
            code: error.error_type,
        }],
        ClaudeStreamEvent::Unknown => vec![],
    };

    Ok(events)
}

/// Claude API response format
#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Internal event types from Claude API SSE format
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeStreamEvent {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
