//! Conversation Analyzer
//!
//! Drives the multi-turn tool-calling loop that turns a document (or an edit
//! to it) into annotations. Each document has one conversation; at most one
//! `analyze()` call is active per document, and starting a new one cancels
//! the previous one.
//!
//! A call works on a private copy of the conversation and commits a new
//! version only when it finishes successfully, so an aborted or failed call
//! leaves the stored conversation exactly as it was.

pub mod prompts;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use marginalia_llm::{LlmProvider, LlmRequestOptions, Message, UsageStats};
use marginalia_tools::{AnnotationResult, ToolContext, ToolTable};

use crate::models::conversation::Conversation;
use crate::models::settings::AnalyzerConfig;
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};

/// Diff lines that describe the patch rather than the text
const DIFF_HEADERS: &[&str] = &["diff ", "index ", "--- ", "+++ ", "@@"];

/// Input to one `analyze()` call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub document_id: String,
    /// What changed since the previous call
    pub patch: String,
    /// The whole document as it is now
    pub full_content: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl AnalysisRequest {
    pub fn new(
        document_id: impl Into<String>,
        patch: impl Into<String>,
        full_content: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            patch: patch.into(),
            full_content: full_content.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// How an `analyze()` call ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// The loop ran and its result was committed
    Completed {
        annotations: Vec<AnnotationResult>,
        /// Model calls made
        iterations: u32,
        /// The loop stopped at `max_iterations` rather than on a final answer
        hit_iteration_cap: bool,
        usage: UsageStats,
    },
    /// The patch held no content lines; no model call was made
    Skipped,
    /// Cancelled, usually by a newer call for the same document
    Aborted,
}

impl AnalysisOutcome {
    /// Annotations produced, empty unless completed
    pub fn annotations(&self) -> &[AnnotationResult] {
        match self {
            AnalysisOutcome::Completed { annotations, .. } => annotations,
            _ => &[],
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, AnalysisOutcome::Aborted)
    }
}

/// Number of lines in `patch` that carry document text.
///
/// Diff headers and lines that are blank once a leading `+`, `-` or space
/// marker is removed are not counted.
pub fn count_patch_lines(patch: &str) -> usize {
    patch
        .lines()
        .filter(|line| !DIFF_HEADERS.iter().any(|h| line.starts_with(h)))
        .map(|line| {
            line.strip_prefix(|c: char| matches!(c, '+' | '-' | ' '))
                .unwrap_or(line)
        })
        .filter(|body| !body.trim().is_empty())
        .count()
}

struct ActiveCall {
    id: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct DocumentSlot {
    /// None until first use
    conversation: Option<Conversation>,
    active: Option<ActiveCall>,
}

/// Registration of one in-flight call. Dropping it clears the document's
/// active call if it is still this one.
struct CallGuard<'a> {
    analyzer: &'a Analyzer,
    document_id: String,
    id: u64,
    token: CancellationToken,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.analyzer.slots();
        if let Some(slot) = slots.get_mut(&self.document_id) {
            if slot.active.as_ref().map(|a| a.id) == Some(self.id) {
                slot.active = None;
            }
        }
    }
}

/// Per-document tool-calling analysis
pub struct Analyzer {
    provider: Arc<dyn LlmProvider>,
    tools: ToolTable,
    config: AnalyzerConfig,
    store: Option<Database>,
    slots: Mutex<HashMap<String, DocumentSlot>>,
    next_call_id: AtomicU64,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("tools", &self.tools)
            .field("config", &self.config)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl Analyzer {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolTable, config: AnalyzerConfig) -> Self {
        Self {
            provider,
            tools,
            config,
            store: None,
            slots: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
        }
    }

    /// Load conversations from `store` on first use and save them after
    /// every committed change.
    pub fn with_store(mut self, store: Database) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, DocumentSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The slot for `document_id`, loading its conversation on first use.
    fn slot<'s>(
        &self,
        slots: &'s mut HashMap<String, DocumentSlot>,
        document_id: &str,
    ) -> AppResult<&'s mut DocumentSlot> {
        let slot = slots.entry(document_id.to_string()).or_default();
        if slot.conversation.is_none() {
            let loaded = match &self.store {
                Some(store) => store.load_conversation(document_id)?,
                None => None,
            };
            if let Some(conv) = &loaded {
                tracing::debug!(
                    document_id = %document_id,
                    messages = conv.len(),
                    "Loaded conversation from store"
                );
            }
            slot.conversation = Some(loaded.unwrap_or_else(|| Conversation::new(document_id)));
        }
        Ok(slot)
    }

    /// Register a new call, cancelling any call still active for the
    /// document. Returns the guard and the conversation to build on.
    fn begin_call(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<(CallGuard<'_>, Conversation)> {
        let mut slots = self.slots();
        let slot = self.slot(&mut slots, document_id)?;

        if let Some(previous) = slot.active.take() {
            tracing::info!(
                document_id = %document_id,
                call_id = previous.id,
                "Cancelling in-flight analysis"
            );
            previous.token.cancel();
        }

        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let token = cancel.child_token();
        slot.active = Some(ActiveCall {
            id,
            token: token.clone(),
        });
        let base = slot
            .conversation
            .clone()
            .unwrap_or_else(|| Conversation::new(document_id));

        Ok((
            CallGuard {
                analyzer: self,
                document_id: document_id.to_string(),
                id,
                token,
            },
            base,
        ))
    }

    /// Replace the document's conversation unless the call was cancelled.
    /// Returns false when the commit was refused.
    fn commit(&self, guard: &CallGuard<'_>, conversation: Conversation) -> bool {
        {
            let mut slots = self.slots();
            if guard.token.is_cancelled() {
                return false;
            }
            let slot = slots.entry(guard.document_id.clone()).or_default();
            slot.conversation = Some(conversation.clone());
        }
        self.persist(&conversation);
        true
    }

    fn persist(&self, conversation: &Conversation) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_conversation(conversation) {
                tracing::warn!(
                    document_id = %conversation.document_id,
                    error = %e,
                    "Failed to save conversation"
                );
            }
        }
    }

    /// Cancel the document's active call, if any
    fn cancel_active(slot: &mut DocumentSlot) {
        if let Some(active) = slot.active.take() {
            active.token.cancel();
        }
    }

    /// Analyze a document edit.
    ///
    /// The first call for a document sends the whole text; later calls send
    /// only `patch`. Cancellation (including being superseded by a newer
    /// call) yields `AnalysisOutcome::Aborted` and leaves the conversation
    /// untouched; any other failure is returned as an error, also without
    /// touching the conversation.
    pub async fn analyze(&self, request: AnalysisRequest) -> AppResult<AnalysisOutcome> {
        self.analyze_with_cancellation(request, CancellationToken::new()).await
    }

    /// `analyze`, also aborting when `cancel` fires.
    ///
    /// The call runs on a child of `cancel`, so a newer call superseding
    /// this one never cancels the caller's token.
    pub async fn analyze_with_cancellation(
        &self,
        request: AnalysisRequest,
        cancel: CancellationToken,
    ) -> AppResult<AnalysisOutcome> {
        let AnalysisRequest {
            document_id,
            patch,
            full_content,
            title,
        } = request;

        let content_lines = count_patch_lines(&patch);
        if content_lines < self.config.min_patch_lines {
            tracing::debug!(
                document_id = %document_id,
                content_lines,
                "Patch below threshold, skipping analysis"
            );
            return Ok(AnalysisOutcome::Skipped);
        }

        let (guard, base) = self.begin_call(&document_id, &cancel)?;
        let first_turn = base.is_empty();
        let user_message = if first_turn {
            prompts::first_turn_message(title.as_deref(), &full_content)
        } else {
            prompts::follow_up_message(&patch)
        };

        tracing::info!(
            document_id = %document_id,
            call_id = guard.id,
            first_turn,
            history = base.len(),
            "Starting analysis"
        );

        let mut messages = base.messages().to_vec();
        messages.push(Message::user(user_message));

        let mut ctx = ToolContext::new(full_content);
        let mut usage = UsageStats::default();
        let mut iterations = 0;
        let mut finished = false;

        while iterations < self.config.max_iterations {
            if guard.token.is_cancelled() {
                return Ok(self.aborted(&guard));
            }
            iterations += 1;

            let options = LlmRequestOptions {
                temperature: self.config.temperature,
                response_format: None,
                reasoning_effort: self.config.reasoning_effort.clone(),
                cancellation_token: Some(guard.token.clone()),
            };
            let response = match self
                .provider
                .send_message(
                    messages.clone(),
                    Some(prompts::SYSTEM_PROMPT.to_string()),
                    self.tools.definitions(),
                    options,
                )
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_cancelled() => return Ok(self.aborted(&guard)),
                Err(e) => {
                    tracing::warn!(
                        document_id = %document_id,
                        iteration = iterations,
                        error = %e,
                        "Analysis failed"
                    );
                    return Err(AppError::from(e));
                }
            };
            usage.add(&response.usage);

            if response.requests_tools() {
                tracing::debug!(
                    document_id = %document_id,
                    iteration = iterations,
                    calls = response.tool_calls.len(),
                    "Executing tool calls"
                );
                let calls = response.tool_calls;
                let results: Vec<Message> = calls
                    .iter()
                    .map(|call| {
                        let result = self.tools.execute(call, &mut ctx);
                        Message::tool_response(&call.id, &call.name, result.to_content())
                    })
                    .collect();
                messages.push(Message::assistant_tool_calls(response.content, calls));
                messages.extend(results);
                continue;
            }

            if let Some(text) = response.non_empty_content() {
                messages.push(Message::assistant(text));
            }
            finished = true;
            break;
        }

        let hit_iteration_cap = !finished;
        if hit_iteration_cap {
            tracing::warn!(
                document_id = %document_id,
                max_iterations = self.config.max_iterations,
                "Analysis stopped at the iteration cap"
            );
        }

        if !self.commit(&guard, base.with_messages(messages)) {
            return Ok(self.aborted(&guard));
        }

        let annotations = ctx.into_annotations();
        tracing::info!(
            document_id = %document_id,
            annotations = annotations.len(),
            iterations,
            total_tokens = usage.total_tokens(),
            "Analysis complete"
        );

        Ok(AnalysisOutcome::Completed {
            annotations,
            iterations,
            hit_iteration_cap,
            usage,
        })
    }

    fn aborted(&self, guard: &CallGuard<'_>) -> AnalysisOutcome {
        tracing::info!(
            document_id = %guard.document_id,
            call_id = guard.id,
            "Analysis aborted"
        );
        AnalysisOutcome::Aborted
    }

    /// The document's current conversation (empty if none yet)
    pub fn conversation(&self, document_id: &str) -> AppResult<Conversation> {
        let mut slots = self.slots();
        let slot = self.slot(&mut slots, document_id)?;
        Ok(slot
            .conversation
            .clone()
            .unwrap_or_else(|| Conversation::new(document_id)))
    }

    /// Index of the last message in the document's conversation
    pub fn last_message_index(&self, document_id: &str) -> AppResult<Option<usize>> {
        Ok(self.conversation(document_id)?.last_index())
    }

    /// Keep messages `0..=message_index`, cancelling any active call.
    pub fn truncate_conversation(
        &self,
        document_id: &str,
        message_index: usize,
    ) -> AppResult<Conversation> {
        let truncated = {
            let mut slots = self.slots();
            let slot = self.slot(&mut slots, document_id)?;
            Self::cancel_active(slot);
            let current = slot
                .conversation
                .clone()
                .unwrap_or_else(|| Conversation::new(document_id));
            let truncated = current.truncated(message_index.saturating_add(1));
            slot.conversation = Some(truncated.clone());
            truncated
        };
        tracing::info!(
            document_id = %document_id,
            messages = truncated.len(),
            "Conversation truncated"
        );
        self.persist(&truncated);
        Ok(truncated)
    }

    /// Drop the document's conversation entirely, cancelling any active call.
    pub fn reset(&self, document_id: &str) -> AppResult<()> {
        {
            let mut slots = self.slots();
            if let Some(slot) = slots.get_mut(document_id) {
                Self::cancel_active(slot);
            }
            slots.insert(
                document_id.to_string(),
                DocumentSlot {
                    conversation: Some(Conversation::new(document_id)),
                    active: None,
                },
            );
        }
        if let Some(store) = &self.store {
            store.delete_conversation(document_id)?;
        }
        tracing::info!(document_id = %document_id, "Conversation reset");
        Ok(())
    }
}
