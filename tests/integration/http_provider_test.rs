//! HTTP Provider Integration Tests
//!
//! Runs `HttpProvider` against a local mock server for each protocol in the
//! dispatch table: request shape and auth headers, response parsing,
//! streaming framing, HTTP error mapping, empty responses and cancellation.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marginalia_core::streaming::UnifiedStreamEvent;
use marginalia_llm::{
    FinishReason, HttpProvider, LlmError, LlmProvider, LlmRequestOptions, Message,
    ProviderConfig, ProviderType, ResponseFormat,
};
use marginalia_tools::annotation_tools;

fn provider(kind: ProviderType, endpoint: String) -> HttpProvider {
    HttpProvider::new(ProviderConfig {
        provider: kind,
        api_key: Some("test-key".to_string()),
        base_url: Some(endpoint),
        model: "test-model".to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn user(text: &str) -> Vec<Message> {
    vec![Message::user(text)]
}

// ============================================================================
// OpenAI
// ============================================================================

#[tokio::test]
async fn test_openai_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "annotate", "arguments": "{\"textSpan\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 9}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(
        ProviderType::OpenAI,
        format!("{}/v1/chat/completions", server.uri()),
    );
    let response = provider
        .send_message(
            user("annotate this"),
            Some("system".to_string()),
            annotation_tools(),
            LlmRequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "annotate");
    assert_eq!(response.tool_calls[0].arguments, "{\"textSpan\":\"x\"}");
    assert_eq!(response.usage.input_tokens, 40);
}

#[tokio::test]
async fn test_openai_json_format_hint_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "choices": [{"message": {"content": "{}"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(ProviderType::OpenAI, server.uri());
    let response = provider
        .send_message(
            user("json please"),
            None,
            vec![],
            LlmRequestOptions::default().with_response_format(ResponseFormat::JsonObject),
        )
        .await
        .unwrap();
    assert_eq!(response.content.as_deref(), Some("{}"));
}

#[tokio::test]
async fn test_openai_streaming() {
    let server = MockServer::start().await;
    let sse = [
        r#"data: {"choices":[{"delta":{"content":"{\"b1\":"}}]}"#,
        "",
        r#"data: {"choices":[{"delta":{"content":" []}"}}]}"#,
        "",
        r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "",
        r#"data: {"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3}}"#,
        "",
        "data: [DONE]",
        "",
    ]
    .join("\n");
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider(ProviderType::OpenAI, server.uri());
    let (tx, mut rx) = mpsc::channel(16);
    let response = provider
        .stream_message(user("go"), None, vec![], tx, LlmRequestOptions::default())
        .await
        .unwrap();

    let mut deltas = Vec::new();
    while let Some(event) = rx.recv().await {
        if let UnifiedStreamEvent::TextDelta { content } = event {
            deltas.push(content);
        }
    }
    assert_eq!(deltas, vec!["{\"b1\":", " []}"]);
    assert_eq!(response.content.as_deref(), Some("{\"b1\": []}"));
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage.total_tokens(), 10);
}

/// Read one HTTP request, headers and body, off the socket
async fn read_request(socket: &mut TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&data[..end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                return;
            }
        }
    }
}

#[tokio::test]
async fn test_stream_keeps_characters_split_across_chunks() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"café au lait\"}}]}\n\ndata: [DONE]\n\n"
        .as_bytes()
        .to_vec();
    // Chunk boundary falls between the two bytes of "é"
    let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await
            .unwrap();
        for part in [&body[..split], &body[split..]] {
            socket
                .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                .await
                .unwrap();
            socket.write_all(part).await.unwrap();
            socket.write_all(b"\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });

    let provider = provider(
        ProviderType::OpenAI,
        format!("http://{}/v1/chat/completions", addr),
    );
    let (tx, mut rx) = mpsc::channel(16);
    let response = provider
        .stream_message(user("go"), None, vec![], tx, LlmRequestOptions::default())
        .await
        .unwrap();

    let mut streamed = String::new();
    while let Some(event) = rx.recv().await {
        if let Some(delta) = event.text() {
            streamed.push_str(delta);
        }
    }
    assert_eq!(streamed, "café au lait");
    assert_eq!(response.content.as_deref(), Some("café au lait"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_http_errors_are_typed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/unauthorized"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let call = |endpoint: &str| {
        let provider = provider(ProviderType::OpenAI, format!("{}{}", server.uri(), endpoint));
        async move {
            provider
                .send_message(user("hi"), None, vec![], LlmRequestOptions::default())
                .await
                .unwrap_err()
        }
    };

    assert!(matches!(call("/limited").await, LlmError::RateLimited { .. }));
    assert!(matches!(
        call("/unauthorized").await,
        LlmError::AuthenticationFailed { .. }
    ));
    assert!(matches!(
        call("/broken").await,
        LlmError::ServerError {
            status: Some(503),
            ..
        }
    ));
}

#[tokio::test]
async fn test_empty_response_without_tools_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "choices": [{"message": {"content": "  "}, "finish_reason": "stop"}]
        })))
        .mount(&server)
        .await;

    let provider = provider(ProviderType::OpenAI, server.uri());
    let err = provider
        .send_message(user("hi"), None, vec![], LlmRequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::EmptyResponse { .. }));

    // With tools offered, an empty turn is passed through
    let response = provider
        .send_message(user("hi"), None, annotation_tools(), LlmRequestOptions::default())
        .await
        .unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_cancellation_is_distinguishable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"choices": [{"message": {"content": "late"}}]}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let provider = provider(ProviderType::OpenAI, server.uri());
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = provider
        .send_message(
            user("hi"),
            None,
            vec![],
            LlmRequestOptions::default().with_cancellation(token),
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ============================================================================
// Anthropic
// ============================================================================

#[tokio::test]
async fn test_anthropic_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"system": "be brief"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "content": [
                {"type": "text", "text": "Two "},
                {"type": "text", "text": "parts"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 11, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(
        ProviderType::Anthropic,
        format!("{}/v1/messages", server.uri()),
    );
    let response = provider
        .send_message(
            user("hello"),
            Some("be brief".to_string()),
            vec![],
            LlmRequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.content.as_deref(), Some("Two parts"));
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage.total_tokens(), 13);
}

#[tokio::test]
async fn test_anthropic_tool_use() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "content": [{
                "type": "tool_use",
                "id": "toolu_1",
                "name": "getNoteContent",
                "input": {}
            }],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 5}
        })))
        .mount(&server)
        .await;

    let provider = provider(ProviderType::Anthropic, server.uri());
    let response = provider
        .send_message(user("hi"), None, annotation_tools(), LlmRequestOptions::default())
        .await
        .unwrap();
    assert!(response.requests_tools());
    assert_eq!(response.tool_calls[0].id, "toolu_1");
    assert_eq!(response.tool_calls[0].parsed_arguments().unwrap(), json!({}));
}

// ============================================================================
// Ollama
// ============================================================================

#[tokio::test]
async fn test_ollama_ndjson_stream() {
    let server = MockServer::start().await;
    let ndjson = [
        r#"{"model":"test-model","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        r#"{"model":"test-model","message":{"role":"assistant","content":"lo"},"done":false}"#,
        r#"{"model":"test-model","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":6,"eval_count":2}"#,
    ]
    .join("\n");
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true, "format": "json"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .mount(&server)
        .await;

    let provider = HttpProvider::new(ProviderConfig {
        provider: ProviderType::Ollama,
        api_key: None,
        base_url: Some(format!("{}/api/chat", server.uri())),
        model: "test-model".to_string(),
        ..Default::default()
    })
    .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let response = provider
        .stream_message(
            user("hi"),
            None,
            vec![],
            tx,
            LlmRequestOptions::default().with_response_format(ResponseFormat::JsonObject),
        )
        .await
        .unwrap();

    let mut text = String::new();
    while let Some(event) = rx.recv().await {
        if let Some(delta) = event.text() {
            text.push_str(delta);
        }
    }
    assert_eq!(text, "Hello");
    assert_eq!(response.content.as_deref(), Some("Hello"));
    assert_eq!(response.usage.input_tokens, 6);
    assert_eq!(response.usage.output_tokens, 2);
}

#[tokio::test]
async fn test_ollama_tool_calls_get_ids() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "getNoteContent", "arguments": {}}},
                    {"function": {"name": "extendList", "arguments": {"textSpan": "a", "extensions": ["b"]}}}
                ]
            },
            "done": true,
            "done_reason": "stop"
        })))
        .mount(&server)
        .await;

    let provider = provider(ProviderType::Ollama, server.uri());
    let response = provider
        .send_message(user("hi"), None, annotation_tools(), LlmRequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    let ids: Vec<&str> = response.tool_calls.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["call_0", "call_1"]);
    assert_eq!(
        response.tool_calls[1].parsed_arguments().unwrap(),
        json!({"textSpan": "a", "extensions": ["b"]})
    );
}
