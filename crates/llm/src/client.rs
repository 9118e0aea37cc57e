//! HTTP Provider
//!
//! The one `LlmProvider` implementation for real backends. It owns the
//! reqwest client and the protocol entry selected by the configured
//! `ProviderType`; everything vendor specific goes through that entry.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::protocol::{protocol_for, LineBuffer, ProviderProtocol, RequestContext};
use super::provider::{
    ensure_not_empty, missing_api_key_error, parse_http_error, with_cancellation, LlmProvider,
};
use super::types::{
    FinishReason, LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig,
    ToolDefinition, UsageStats,
};
use crate::http_client::build_http_client;
use marginalia_core::streaming::UnifiedStreamEvent;

/// Provider that speaks any protocol in the dispatch table over HTTP
pub struct HttpProvider {
    config: ProviderConfig,
    protocol: &'static ProviderProtocol,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Create a provider for the given configuration.
    ///
    /// Fails only if the proxy URL is invalid or the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(config.proxy.as_deref())?;
        let protocol = protocol_for(config.provider);
        Ok(Self {
            config,
            protocol,
            client,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn api_key(&self) -> LlmResult<Option<&str>> {
        let key = self.config.api_key.as_deref().filter(|k| !k.is_empty());
        if key.is_none() && self.protocol.requires_api_key {
            return Err(missing_api_key_error(self.protocol.name));
        }
        Ok(key)
    }

    /// POST the request body and return the response once the status is OK
    async fn post(&self, body: &serde_json::Value) -> LlmResult<reqwest::Response> {
        let api_key = self.api_key()?;
        let endpoint = self.protocol.endpoint(&self.config);

        let mut request = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json");
        for (name, value) in (self.protocol.auth_headers)(api_key) {
            request = request.header(name, value);
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                provider = self.protocol.name,
                status,
                "LLM request failed"
            );
            return Err(parse_http_error(status, &body_text, self.protocol.name));
        }

        Ok(response)
    }

    fn build_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        options: &LlmRequestOptions,
        stream: bool,
    ) -> serde_json::Value {
        (self.protocol.build_request)(&RequestContext {
            config: &self.config,
            messages,
            system,
            tools,
            options,
            stream,
        })
    }

    async fn send_inner(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        options: &LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_body(messages, system, tools, options, false);
        let response = self.post(&body).await?;
        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;

        let mut parsed = (self.protocol.parse_response)(&body_text)?;
        if parsed.model.is_empty() {
            parsed.model = self.config.model.clone();
        }
        Ok(parsed)
    }

    async fn stream_inner(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        options: &LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_body(messages, system, tools, options, true);
        let response = self.post(&body).await?;

        let mut accumulated_content = String::new();
        let mut usage = UsageStats::default();
        let mut finish_reason = FinishReason::Stop;

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

            for line in lines.push(&chunk) {
                self.handle_stream_line(
                    &line,
                    tx,
                    &mut accumulated_content,
                    &mut usage,
                    &mut finish_reason,
                )
                .await;
            }
        }

        // A final line without a trailing newline
        if let Some(line) = lines.finish() {
            self.handle_stream_line(
                &line,
                tx,
                &mut accumulated_content,
                &mut usage,
                &mut finish_reason,
            )
            .await;
        }

        Ok(LlmResponse {
            content: if accumulated_content.is_empty() {
                None
            } else {
                Some(accumulated_content)
            },
            tool_calls: Vec::new(),
            finish_reason,
            usage,
            model: self.config.model.clone(),
        })
    }

    async fn handle_stream_line(
        &self,
        line: &str,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        accumulated_content: &mut String,
        usage: &mut UsageStats,
        finish_reason: &mut FinishReason,
    ) {
        if line.trim().is_empty() {
            return;
        }

        match (self.protocol.parse_stream_line)(line) {
            Ok(events) => {
                for event in events {
                    match &event {
                        UnifiedStreamEvent::TextDelta { content } => {
                            accumulated_content.push_str(content);
                        }
                        UnifiedStreamEvent::Usage {
                            input_tokens,
                            output_tokens,
                        } => {
                            // Some protocols report input and output in separate events
                            if *input_tokens > 0 {
                                usage.input_tokens = *input_tokens;
                            }
                            if *output_tokens > 0 {
                                usage.output_tokens = *output_tokens;
                            }
                        }
                        UnifiedStreamEvent::Complete {
                            stop_reason: Some(reason),
                        } => {
                            *finish_reason = FinishReason::from(reason.as_str());
                        }
                        _ => {}
                    }

                    // Forward content and errors; completion and usage are
                    // reported through the returned response instead.
                    if !matches!(
                        &event,
                        UnifiedStreamEvent::Complete { .. } | UnifiedStreamEvent::Usage { .. }
                    ) {
                        let _ = tx.send(event).await;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(provider = self.protocol.name, error = %e, "Unparseable stream line");
                let _ = tx
                    .send(UnifiedStreamEvent::Error {
                        message: e.to_string(),
                        code: None,
                    })
                    .await;
            }
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &'static str {
        self.protocol.name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        tracing::debug!(
            provider = self.protocol.name,
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending LLM request"
        );

        let response = with_cancellation(
            request_options.cancellation_token.as_ref(),
            self.send_inner(&messages, system.as_deref(), &tools, &request_options),
        )
        .await?;

        ensure_not_empty(response, !tools.is_empty())
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        tracing::debug!(
            provider = self.protocol.name,
            model = %self.config.model,
            messages = messages.len(),
            "Streaming LLM request"
        );

        let response = with_cancellation(
            request_options.cancellation_token.as_ref(),
            self.stream_inner(&messages, system.as_deref(), &tools, &tx, &request_options),
        )
        .await?;

        ensure_not_empty(response, !tools.is_empty())
    }
}
