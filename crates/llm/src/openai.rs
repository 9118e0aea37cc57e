//! OpenAI Protocol
//!
//! Chat Completions wire format. Also used for any OpenAI-compatible
//! endpoint configured through `base_url`.

use serde::Deserialize;

use super::protocol::{sse_data, ProviderProtocol, RequestContext};
use super::types::{
    FinishReason, LlmError, LlmResponse, LlmResult, Message, MessageRole, ResponseFormat,
    ToolCall, ToolDefinition, UsageStats,
};
use marginalia_core::streaming::{AdapterError, UnifiedStreamEvent};

/// Default OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub static PROTOCOL: ProviderProtocol = ProviderProtocol {
    name: "openai",
    default_endpoint: OPENAI_API_URL,
    requires_api_key: true,
    build_request,
    parse_response,
    parse_stream_line,
    auth_headers,
};

/// Check if model is a reasoning model (o1/o3/o4 families)
fn is_reasoning_model(model: &str) -> bool {
    let model = model.to_lowercase();
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
}

fn auth_headers(api_key: Option<&str>) -> Vec<(&'static str, String)> {
    match api_key {
        Some(key) => vec![("Authorization", format!("Bearer {}", key))],
        None => Vec::new(),
    }
}

/// Build the request body for the API
fn build_request(ctx: &RequestContext<'_>) -> serde_json::Value {
    let reasoning = is_reasoning_model(&ctx.config.model);
    let mut body = serde_json::json!({
        "model": ctx.config.model,
        "max_tokens": ctx.config.max_tokens,
        "stream": ctx.stream,
    });

    // Reasoning models reject temperature but accept an effort hint
    if reasoning {
        if let Some(effort) = &ctx.options.reasoning_effort {
            body["reasoning_effort"] = serde_json::json!(effort);
        }
    } else {
        body["temperature"] = serde_json::json!(ctx.options.temperature);
    }

    if let Some(ResponseFormat::JsonObject) = ctx.options.response_format {
        body["response_format"] = serde_json::json!({ "type": "json_object" });
    }

    let mut openai_messages: Vec<serde_json::Value> = Vec::new();
    if let Some(sys) = ctx.system {
        openai_messages.push(serde_json::json!({
            "role": "system",
            "content": sys
        }));
    }
    openai_messages.extend(ctx.messages.iter().map(message_to_openai));
    body["messages"] = serde_json::json!(openai_messages);

    if !ctx.tools.is_empty() {
        let openai_tools: Vec<serde_json::Value> = ctx.tools.iter().map(tool_to_openai).collect();
        body["tools"] = serde_json::json!(openai_tools);
    }

    if ctx.stream {
        body["stream_options"] = serde_json::json!({
            "include_usage": true
        });
    }

    body
}

/// Convert a Message to OpenAI API format
fn message_to_openai(message: &Message) -> serde_json::Value {
    match message.role {
        MessageRole::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "name": message.name,
            "content": message.text_content(),
        }),
        MessageRole::Assistant if message.has_tool_calls() => {
            let tool_calls: Vec<serde_json::Value> = message
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments
                        }
                    })
                })
                .collect();

            // Always include content field; some OpenAI-compatible APIs
            // require it even when the assistant only emits tool calls.
            serde_json::json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": tool_calls
            })
        }
        role => {
            let role = match role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                _ => "assistant",
            };
            serde_json::json!({
                "role": role,
                "content": message.text_content()
            })
        }
    }
}

/// Convert a ToolDefinition to OpenAI API format
fn tool_to_openai(tool: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema
        }
    })
}

/// Parse a response from OpenAI API
fn parse_response(body: &str) -> LlmResult<LlmResponse> {
    let response: OpenAIResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ParseError {
            message: format!("Failed to parse response: {}", e),
        })?;

    let choice = response.choices.into_iter().next();

    let mut content = None;
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    if let Some(choice) = choice {
        finish_reason = choice.finish_reason;
        if let Some(msg) = choice.message {
            content = msg.content;
            for tc in msg.tool_calls.unwrap_or_default() {
                tool_calls.push(ToolCall::new(tc.id, tc.function.name, tc.function.arguments));
            }
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        finish_reason
            .as_deref()
            .map(FinishReason::from)
            .unwrap_or(FinishReason::Stop)
    } else {
        FinishReason::ToolCalls
    };

    let usage = response
        .usage
        .map(|u| UsageStats {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
        model: response.model,
    })
}

/// Parse one SSE line from a streamed completion
fn parse_stream_line(line: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
    let Some(data) = sse_data(line) else {
        return Ok(Vec::new());
    };

    let chunk: StreamChunk = serde_json::from_str(data)?;
    let mut events = Vec::new();

    if let Some(error) = chunk.error {
        events.push(UnifiedStreamEvent::Error {
            message: error.message,
            code: error.code,
        });
        return Ok(events);
    }

    for choice in chunk.choices {
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            if !text.is_empty() {
                events.push(UnifiedStreamEvent::TextDelta { content: text });
            }
        }
        if let Some(reason) = choice.finish_reason {
            events.push(UnifiedStreamEvent::Complete {
                stop_reason: Some(reason),
            });
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(UnifiedStreamEvent::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        });
    }

    Ok(events)
}

/// OpenAI API response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ResponseUsage>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
    code: Option<String>,
}
