//! Tool Dispatch Table
//!
//! Maps tool names to handlers. Every failure a handler can hit (bad
//! arguments, empty span, unknown tool) comes back as an error `ToolResult`
//! for the model to read and retry; nothing here aborts a turn.

use serde::Deserialize;

use marginalia_core::{CoreError, CoreResult};
use marginalia_llm::{ToolCall, ToolDefinition};

use crate::annotation::{clean_text_span, AnnotationResult, ReferenceRecord};
use crate::definitions::{
    annotation_tools, ANNOTATE, EXTEND_LIST, GET_NOTE_CONTENT, MAX_EXTENSIONS, MAX_RECORDS,
};
use crate::executor::ToolResult;

/// State a tool call may read or extend, scoped to one analysis call
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Current full document text, served by `getNoteContent`
    pub note_content: String,
    /// Annotations accepted so far
    pub annotations: Vec<AnnotationResult>,
}

impl ToolContext {
    pub fn new(note_content: impl Into<String>) -> Self {
        Self {
            note_content: note_content.into(),
            annotations: Vec::new(),
        }
    }

    /// Take the accumulated annotations
    pub fn into_annotations(self) -> Vec<AnnotationResult> {
        self.annotations
    }
}

/// Handler signature: decoded arguments in, tool output text out
pub type ToolHandler = fn(&serde_json::Value, &mut ToolContext) -> CoreResult<String>;

/// One named tool
#[derive(Clone, Copy)]
pub struct ToolEntry {
    pub name: &'static str,
    pub handler: ToolHandler,
}

static ANNOTATION_ENTRIES: [ToolEntry; 3] = [
    ToolEntry {
        name: ANNOTATE,
        handler: annotate,
    },
    ToolEntry {
        name: EXTEND_LIST,
        handler: extend_list,
    },
    ToolEntry {
        name: GET_NOTE_CONTENT,
        handler: get_note_content,
    },
];

/// Name-keyed dispatch over a fixed set of tools
#[derive(Clone, Copy)]
pub struct ToolTable {
    entries: &'static [ToolEntry],
    definitions: fn() -> Vec<ToolDefinition>,
}

impl ToolTable {
    /// The annotation toolset: `annotate`, `extendList`, `getNoteContent`
    pub fn annotation() -> Self {
        Self {
            entries: &ANNOTATION_ENTRIES,
            definitions: annotation_tools,
        }
    }

    /// Schemas to send to the provider
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        (self.definitions)()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    fn lookup(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Execute one tool call against the context.
    pub fn execute(&self, call: &ToolCall, ctx: &mut ToolContext) -> ToolResult {
        let result = self.lookup(&call.name).map_or_else(
            || Err(CoreError::not_found(format!("Unknown tool: {}", call.name))),
            |entry| {
                let args = call
                    .parsed_arguments()
                    .map_err(|e| CoreError::invalid_arguments(e.to_string()))?;
                (entry.handler)(&args, ctx)
            },
        );

        match result {
            Ok(output) => {
                tracing::debug!(tool = %call.name, id = %call.id, "Tool call succeeded");
                ToolResult::ok(output)
            }
            Err(e) => {
                tracing::debug!(tool = %call.name, id = %call.id, error = %e, "Tool call rejected");
                ToolResult::err(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolTable")
            .field("tools", &self.names())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateArgs {
    #[serde(rename = "textSpan", default)]
    text_span: String,
    #[serde(default)]
    records: Vec<ReferenceRecord>,
}

#[derive(Debug, Deserialize)]
struct ExtendListArgs {
    #[serde(rename = "textSpan", default)]
    text_span: String,
    #[serde(default)]
    extensions: Vec<String>,
}

fn decode<T: for<'de> Deserialize<'de>>(args: &serde_json::Value) -> CoreResult<T> {
    T::deserialize(args).map_err(|e| CoreError::invalid_arguments(e.to_string()))
}

fn cleaned_span(raw: &str) -> CoreResult<String> {
    let span = clean_text_span(raw);
    if span.is_empty() {
        return Err(CoreError::validation(
            "textSpan is empty; pass an exact substring of the note",
        ));
    }
    Ok(span)
}

fn acknowledge(kind: &str, span: &str, count: usize) -> String {
    serde_json::json!({
        "success": true,
        "type": kind,
        "textSpan": span,
        "count": count,
    })
    .to_string()
}

fn annotate(args: &serde_json::Value, ctx: &mut ToolContext) -> CoreResult<String> {
    let AnnotateArgs {
        text_span,
        mut records,
    } = decode(args)?;
    let text_span = cleaned_span(&text_span)?;

    if records.is_empty() {
        return Err(CoreError::invalid_arguments("records must not be empty"));
    }
    if records.len() > MAX_RECORDS {
        tracing::warn!(
            received = records.len(),
            kept = MAX_RECORDS,
            "annotate: dropping extra records"
        );
        records.truncate(MAX_RECORDS);
    }

    let ack = acknowledge("reference", &text_span, records.len());
    ctx.annotations
        .push(AnnotationResult::Reference { text_span, records });
    Ok(ack)
}

fn extend_list(args: &serde_json::Value, ctx: &mut ToolContext) -> CoreResult<String> {
    let ExtendListArgs {
        text_span,
        extensions,
    } = decode(args)?;
    let text_span = cleaned_span(&text_span)?;

    let mut extensions: Vec<String> = extensions
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    if extensions.is_empty() {
        return Err(CoreError::invalid_arguments("extensions must not be empty"));
    }
    if extensions.len() > MAX_EXTENSIONS {
        tracing::warn!(
            received = extensions.len(),
            kept = MAX_EXTENSIONS,
            "extendList: dropping extra extensions"
        );
        extensions.truncate(MAX_EXTENSIONS);
    }

    let ack = acknowledge("list", &text_span, extensions.len());
    ctx.annotations.push(AnnotationResult::List {
        text_span,
        extensions,
    });
    Ok(ack)
}

fn get_note_content(_args: &serde_json::Value, ctx: &mut ToolContext) -> CoreResult<String> {
    Ok(ctx.note_content.clone())
}
