//! One-Shot Block Analysis
//!
//! Asks the model for a single JSON object keyed by block id instead of
//! running the tool-calling loop. The response is streamed and each block's
//! annotations are handed out as soon as that block's value is complete.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use marginalia_core::streaming::UnifiedStreamEvent;
use marginalia_llm::{LlmProvider, LlmRequestOptions, Message, ResponseFormat, UsageStats};
use marginalia_tools::AnnotationResult;

use super::analyzer::prompts;
use super::response::{BlockExtractor, CompletedBlock};
use crate::models::document::DocumentBlock;
use crate::models::settings::AnalyzerConfig;
use crate::utils::error::AppResult;

/// Stream events buffered between the provider and the extractor
const STREAM_BUFFER: usize = 256;

/// Annotations for one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAnnotations {
    pub block_id: String,
    pub annotations: Vec<AnnotationResult>,
}

/// How a block analysis ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockAnalysisOutcome {
    /// Every block the model answered for, in declared order
    Completed {
        blocks: Vec<BlockAnnotations>,
        usage: UsageStats,
    },
    Aborted,
}

/// Decode one block's value into annotations.
///
/// Entries that do not decode are skipped, as are entries whose span is
/// empty after cleaning.
fn decode_block(block: CompletedBlock) -> BlockAnnotations {
    let entries = match block.value {
        serde_json::Value::Array(entries) => entries,
        other => {
            tracing::debug!(block_id = %block.id, value = %other, "Block value is not an array");
            Vec::new()
        }
    };

    let annotations = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<AnnotationResult>(entry) {
            Ok(annotation) => annotation.cleaned(),
            Err(e) => {
                tracing::debug!(block_id = %block.id, error = %e, "Skipping malformed annotation");
                None
            }
        })
        .collect();

    BlockAnnotations {
        block_id: block.id,
        annotations,
    }
}

/// Block-mode analysis over a provider's streaming call
pub struct BlockAnalyzer {
    provider: Arc<dyn LlmProvider>,
    config: AnalyzerConfig,
}

impl BlockAnalyzer {
    pub fn new(provider: Arc<dyn LlmProvider>, config: AnalyzerConfig) -> Self {
        Self { provider, config }
    }

    /// Analyze `blocks` in one streamed model call.
    ///
    /// Each block's annotations are sent on `updates` (if given) as soon as
    /// the block completes. The returned outcome holds every block found,
    /// including those only recoverable once the stream ended. If blocks are
    /// still missing at stream end and the full text is not JSON even after
    /// repair, the strict parse error is returned.
    pub async fn analyze(
        &self,
        blocks: &[DocumentBlock],
        markdown: &str,
        cancel: CancellationToken,
        updates: Option<mpsc::Sender<BlockAnnotations>>,
    ) -> AppResult<BlockAnalysisOutcome> {
        if blocks.is_empty() {
            return Ok(BlockAnalysisOutcome::Completed {
                blocks: Vec::new(),
                usage: UsageStats::default(),
            });
        }

        let mut extractor = BlockExtractor::new(blocks.iter().map(|b| b.id.clone()));
        let options = LlmRequestOptions {
            temperature: self.config.temperature,
            response_format: Some(ResponseFormat::JsonObject),
            reasoning_effort: self.config.reasoning_effort.clone(),
            cancellation_token: Some(cancel),
        };
        let messages = vec![Message::user(prompts::block_message(blocks, markdown))];

        tracing::info!(blocks = blocks.len(), "Starting block analysis");

        let (tx, mut rx) = mpsc::channel::<UnifiedStreamEvent>(STREAM_BUFFER);
        let call = self.provider.stream_message(
            messages,
            Some(prompts::BLOCK_SYSTEM_PROMPT.to_string()),
            Vec::new(),
            tx,
            options,
        );

        let mut buffer = String::new();
        let mut found: Vec<BlockAnnotations> = Vec::new();
        let consume = async {
            while let Some(event) = rx.recv().await {
                match event {
                    UnifiedStreamEvent::TextDelta { content } => {
                        buffer.push_str(&content);
                        while let Some(block) = extractor.extract(&buffer) {
                            let decoded = decode_block(block);
                            if let Some(updates) = &updates {
                                // A dropped receiver only loses the early copy
                                let _ = updates.send(decoded.clone()).await;
                            }
                            found.push(decoded);
                        }
                    }
                    UnifiedStreamEvent::Error { message, .. } => {
                        tracing::warn!(error = %message, "Stream reported an error");
                    }
                    _ => {}
                }
            }
        };

        let (result, ()) = tokio::join!(call, consume);
        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_cancelled() => {
                tracing::info!(completed = found.len(), "Block analysis aborted");
                return Ok(BlockAnalysisOutcome::Aborted);
            }
            Err(e) => return Err(e.into()),
        };

        // Providers that do not stream deltas still return the full text
        if buffer.trim().is_empty() {
            if let Some(content) = &response.content {
                buffer.push_str(content);
            }
        }

        let rest = extractor.finish(&buffer).map_err(|e| {
            tracing::warn!(
                error = %e,
                pending = ?extractor.pending_ids(),
                "Could not recover remaining blocks"
            );
            e
        })?;
        found.extend(rest.into_iter().map(decode_block));

        let mut ordered = Vec::with_capacity(found.len());
        for block in blocks {
            if let Some(pos) = found.iter().position(|f| f.block_id == block.id) {
                ordered.push(found.swap_remove(pos));
            }
        }

        tracing::info!(
            answered = ordered.len(),
            total_tokens = response.usage.total_tokens(),
            "Block analysis complete"
        );

        Ok(BlockAnalysisOutcome::Completed {
            blocks: ordered,
            usage: response.usage,
        })
    }
}
