//! Shared test doubles

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use marginalia_core::streaming::UnifiedStreamEvent;
use marginalia_llm::provider::with_cancellation;
use marginalia_llm::{
    FinishReason, LlmError, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message,
    ToolCall, ToolDefinition, UsageStats,
};

/// One scripted provider call
pub struct Step {
    response: LlmResult<LlmResponse>,
    chunks: Vec<String>,
    /// Wait for `release` after sending this many chunks
    hold_after: Option<usize>,
}

impl Step {
    pub fn reply(response: LlmResult<LlmResponse>) -> Self {
        Self {
            response,
            chunks: Vec::new(),
            hold_after: None,
        }
    }

    /// Reply only once `release` is notified (or the call is cancelled)
    pub fn held(response: LlmResult<LlmResponse>) -> Self {
        Self {
            hold_after: Some(0),
            ..Self::reply(response)
        }
    }

    /// Stream `chunks` as text deltas, then return their concatenation
    pub fn stream(chunks: &[&str]) -> Self {
        let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        Self {
            response: text(&chunks.concat()),
            chunks,
            hold_after: None,
        }
    }

    pub fn hold_after(mut self, sent: usize) -> Self {
        self.hold_after = Some(sent);
        self
    }
}

/// Provider double that plays back a script and records every request
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<Vec<Message>>>,
    /// Notified when a held call starts
    pub started: Notify,
    /// Releases a held call
    pub release: Notify,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            started: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, messages: Vec<Message>) -> Step {
        self.requests.lock().unwrap().push(messages);
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Step::reply(Err(LlmError::Other {
                    message: "script exhausted".to_string(),
                }))
            })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _tools: Vec<ToolDefinition>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let step = self.next_step(messages);
        if step.hold_after.is_some() {
            self.started.notify_one();
        }
        with_cancellation(request_options.cancellation_token.as_ref(), async move {
            if step.hold_after.is_some() {
                self.release.notified().await;
            }
            step.response
        })
        .await
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        _system: Option<String>,
        _tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let step = self.next_step(messages);
        if step.hold_after.is_some() {
            self.started.notify_one();
        }
        with_cancellation(request_options.cancellation_token.as_ref(), async move {
            for (sent, chunk) in step.chunks.iter().enumerate() {
                if step.hold_after == Some(sent) {
                    self.release.notified().await;
                }
                let _ = tx
                    .send(UnifiedStreamEvent::TextDelta {
                        content: chunk.clone(),
                    })
                    .await;
            }
            step.response
        })
        .await
    }
}

pub fn text(content: &str) -> LlmResult<LlmResponse> {
    Ok(LlmResponse {
        content: Some(content.to_string()),
        tool_calls: vec![],
        finish_reason: FinishReason::Stop,
        usage: UsageStats {
            input_tokens: 12,
            output_tokens: 4,
        },
        model: "scripted-model".to_string(),
    })
}

pub fn tool_calls(calls: Vec<ToolCall>) -> LlmResult<LlmResponse> {
    Ok(LlmResponse {
        content: None,
        tool_calls: calls,
        finish_reason: FinishReason::ToolCalls,
        usage: UsageStats {
            input_tokens: 30,
            output_tokens: 10,
        },
        model: "scripted-model".to_string(),
    })
}

pub fn annotate_args(span: &str) -> String {
    serde_json::json!({
        "textSpan": span,
        "records": [{
            "description": "Overview",
            "title": "A Book",
            "domain": "general",
            "search_query": span,
        }]
    })
    .to_string()
}
