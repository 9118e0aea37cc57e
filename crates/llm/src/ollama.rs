//! Ollama Protocol
//!
//! Native `/api/chat` wire format for local inference. No API key, NDJSON
//! streaming, tool-call arguments travel as JSON objects and carry no ids.

use serde::Deserialize;

use super::protocol::{ProviderProtocol, RequestContext};
use super::types::{
    FinishReason, LlmError, LlmResponse, LlmResult, Message, MessageRole, ResponseFormat,
    ToolCall, ToolDefinition, UsageStats,
};
use marginalia_core::streaming::{AdapterError, UnifiedStreamEvent};

/// Default Ollama chat endpoint
const OLLAMA_CHAT_URL: &str = "http://localhost:11434/api/chat";

pub static PROTOCOL: ProviderProtocol = ProviderProtocol {
    name: "ollama",
    default_endpoint: OLLAMA_CHAT_URL,
    requires_api_key: false,
    build_request,
    parse_response,
    parse_stream_line,
    auth_headers,
};

/// Ollama needs no auth; a key is still sent when configured, for
/// authenticating reverse proxies in front of the server.
fn auth_headers(api_key: Option<&str>) -> Vec<(&'static str, String)> {
    match api_key {
        Some(key) if !key.is_empty() => vec![("Authorization", format!("Bearer {}", key))],
        _ => Vec::new(),
    }
}

/// Build the request body. `reasoning_effort` is dropped.
fn build_request(ctx: &RequestContext<'_>) -> serde_json::Value {
    let mut ollama_messages: Vec<serde_json::Value> = Vec::new();
    if let Some(sys) = ctx.system {
        ollama_messages.push(serde_json::json!({ "role": "system", "content": sys }));
    }
    ollama_messages.extend(ctx.messages.iter().map(message_to_ollama));

    let mut body = serde_json::json!({
        "model": ctx.config.model,
        "messages": ollama_messages,
        "stream": ctx.stream,
        "options": {
            "temperature": ctx.options.temperature,
            "num_predict": ctx.config.max_tokens,
        },
    });

    if let Some(ResponseFormat::JsonObject) = ctx.options.response_format {
        body["format"] = serde_json::json!("json");
    }

    if !ctx.tools.is_empty() {
        let tools: Vec<serde_json::Value> = ctx.tools.iter().map(tool_to_ollama).collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

fn message_to_ollama(message: &Message) -> serde_json::Value {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };
    let mut msg = serde_json::json!({
        "role": role,
        "content": message.text_content(),
    });

    if message.role == MessageRole::Tool {
        if let Some(name) = &message.name {
            msg["tool_name"] = serde_json::json!(name);
        }
    }

    if message.has_tool_calls() {
        let calls: Vec<serde_json::Value> = message
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "function": {
                        "name": tc.name,
                        "arguments": tc.parsed_arguments().unwrap_or_else(|_| serde_json::json!({}))
                    }
                })
            })
            .collect();
        msg["tool_calls"] = serde_json::json!(calls);
    }

    msg
}

fn tool_to_ollama(tool: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema
        }
    })
}

/// Parse a complete (non-streamed) chat response.
///
/// Ollama reports `stop` even when it emits tool calls, and gives the calls
/// no ids; ids are synthesized as `call_{index}`.
fn parse_response(body: &str) -> LlmResult<LlmResponse> {
    let response: OllamaChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ParseError {
            message: format!("Failed to parse response: {}", e),
        })?;

    if let Some(error) = response.error {
        return Err(LlmError::ServerError {
            message: error,
            status: None,
        });
    }

    let message = response.message.unwrap_or_default();
    let tool_calls: Vec<ToolCall> = message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(i, tc)| {
            ToolCall::new(
                format!("call_{}", i),
                tc.function.name,
                tc.function.arguments.to_string(),
            )
        })
        .collect();

    let finish_reason = if tool_calls.is_empty() {
        response
            .done_reason
            .as_deref()
            .map(FinishReason::from)
            .unwrap_or(FinishReason::Stop)
    } else {
        FinishReason::ToolCalls
    };

    Ok(LlmResponse {
        content: message.content.filter(|c| !c.is_empty()),
        tool_calls,
        finish_reason,
        usage: UsageStats {
            input_tokens: response.prompt_eval_count.unwrap_or(0),
            output_tokens: response.eval_count.unwrap_or(0),
        },
        model: response.model,
    })
}

/// Parse one NDJSON line from a streamed chat
fn parse_stream_line(line: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let chunk: OllamaChatResponse = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Ok(vec![UnifiedStreamEvent::Error {
            message: error,
            code: None,
        }]);
    }

    let mut events = Vec::new();
    if let Some(text) = chunk.message.and_then(|m| m.content) {
        if !text.is_empty() {
            events.push(UnifiedStreamEvent::TextDelta { content: text });
        }
    }

    if chunk.done {
        events.push(UnifiedStreamEvent::Usage {
            input_tokens: chunk.prompt_eval_count.unwrap_or(0),
            output_tokens: chunk.eval_count.unwrap_or(0),
        });
        events.push(UnifiedStreamEvent::Complete {
            stop_reason: chunk.done_reason,
        });
    }

    Ok(events)
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}
