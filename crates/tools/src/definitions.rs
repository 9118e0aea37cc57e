//! Tool Definitions
//!
//! Schemas sent to the provider with every tool-calling request.

use std::collections::HashMap;

use marginalia_llm::{ParameterSchema, ToolDefinition};

pub const ANNOTATE: &str = "annotate";
pub const EXTEND_LIST: &str = "extendList";
pub const GET_NOTE_CONTENT: &str = "getNoteContent";

/// Maximum reference records per `annotate` call
pub const MAX_RECORDS: usize = 3;
/// Maximum suggestions per `extendList` call
pub const MAX_EXTENSIONS: usize = 4;

fn text_span_schema() -> ParameterSchema {
    ParameterSchema::string(Some(
        "Exact, unmodified substring of the document to anchor the annotation to. \
         Do not paraphrase, correct, or use ellipsis.",
    ))
}

fn record_schema() -> ParameterSchema {
    let mut properties = HashMap::new();
    properties.insert(
        "description".to_string(),
        ParameterSchema::string(Some("Why this source is relevant to the text span")),
    );
    properties.insert(
        "title".to_string(),
        ParameterSchema::string(Some("Title of the work")),
    );
    properties.insert(
        "author".to_string(),
        ParameterSchema::string(Some("Author, if known")),
    );
    properties.insert(
        "domain".to_string(),
        ParameterSchema::string(Some("Field or discipline of the work")),
    );
    properties.insert(
        "search_query".to_string(),
        ParameterSchema::string(Some("A web search query that finds this work")),
    );
    ParameterSchema::object(
        None,
        properties,
        vec![
            "description".to_string(),
            "title".to_string(),
            "domain".to_string(),
            "search_query".to_string(),
        ],
    )
}

/// `annotate(textSpan, records[1..3])`
pub fn annotate_tool() -> ToolDefinition {
    let mut properties = HashMap::new();
    properties.insert("textSpan".to_string(), text_span_schema());
    properties.insert(
        "records".to_string(),
        ParameterSchema::array(Some("Reference records for the span"), record_schema())
            .with_item_bounds(1, MAX_RECORDS as u32),
    );
    ToolDefinition {
        name: ANNOTATE.to_string(),
        description: "Attach references (books, papers, articles) to a passage of the note."
            .to_string(),
        input_schema: ParameterSchema::object(
            None,
            properties,
            vec!["textSpan".to_string(), "records".to_string()],
        ),
    }
}

/// `extendList(textSpan, extensions[1..4])`
pub fn extend_list_tool() -> ToolDefinition {
    let mut properties = HashMap::new();
    properties.insert("textSpan".to_string(), text_span_schema());
    properties.insert(
        "extensions".to_string(),
        ParameterSchema::array(
            Some("New items that continue the list"),
            ParameterSchema::string(None),
        )
        .with_item_bounds(1, MAX_EXTENSIONS as u32),
    );
    ToolDefinition {
        name: EXTEND_LIST.to_string(),
        description: "Suggest further items for a list in the note.".to_string(),
        input_schema: ParameterSchema::object(
            None,
            properties,
            vec!["textSpan".to_string(), "extensions".to_string()],
        ),
    }
}

/// `getNoteContent()`
pub fn get_note_content_tool() -> ToolDefinition {
    ToolDefinition {
        name: GET_NOTE_CONTENT.to_string(),
        description: "Return the full current text of the note.".to_string(),
        input_schema: ParameterSchema::object(None, HashMap::new(), Vec::new()),
    }
}

/// All annotation tools, in the order they are offered to the model
pub fn annotation_tools() -> Vec<ToolDefinition> {
    vec![annotate_tool(), extend_list_tool(), get_note_content_tool()]
}
