//! Analyzer Prompts
//!
//! System prompts and user-turn framing for both analysis modes.

use crate::models::document::DocumentBlock;

/// System prompt for the tool-calling loop
pub const SYSTEM_PROMPT: &str = r#"You are a research assistant writing notes in the margin of a document.

Read the note and decide which passages deserve a marginal annotation. Use the tools:
- annotate: attach 1 to 3 reference records (a book, paper, article or other source worth reading) to a passage that names a concept, claim, person or work.
- extendList: suggest 1 to 4 further items for a list the author has started.
- getNoteContent: read the full current note when you need more context.

Rules for textSpan:
- It must be copied character for character from the note. Do not fix spelling, punctuation or capitalization.
- Never shorten it with an ellipsis and never paraphrase it.
- Keep it short: the smallest passage that identifies what you are annotating.

Only annotate passages that are new or changed since your previous annotations. Prefer fewer, better annotations; it is fine to make none. When you are finished, reply with a one-sentence summary and no tool calls."#;

/// System prompt for the one-shot block mode
pub const BLOCK_SYSTEM_PROMPT: &str = r#"You are a research assistant writing notes in the margin of a document. The document is given as numbered blocks.

Answer with a single JSON object and nothing else. Each key is a block id; each value is an array of annotations for that block (an empty array if the block needs none). Emit the keys in the order the blocks are given.

An annotation is one of:
{"type": "reference", "textSpan": "...", "records": [{"description": "...", "title": "...", "author": "...", "domain": "...", "search_query": "..."}]}
{"type": "list", "textSpan": "...", "extensions": ["...", "..."]}

textSpan must be copied character for character from the block: no corrected spelling or punctuation, no ellipsis. Give 1 to 3 records per reference and 1 to 4 extensions per list."#;

/// First message of a conversation: the whole document.
pub fn first_turn_message(title: Option<&str>, content: &str) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or("Untitled");
    format!(
        "Here is a note I am writing. Annotate the passages that would benefit from a reference or a list extension.\n\nTitle: {}\n\n<note>\n{}\n</note>",
        title, content
    )
}

/// Later messages carry only what changed.
pub fn follow_up_message(patch: &str) -> String {
    format!(
        "I edited the note. Annotate only the new or changed text; call getNoteContent if you need the rest.\n\n<patch>\n{}\n</patch>",
        patch
    )
}

/// User message for block mode: the blocks by id, then the full markdown.
pub fn block_message(blocks: &[DocumentBlock], markdown: &str) -> String {
    let mut out = String::from("Blocks:\n");
    for block in blocks {
        out.push_str(&format!("\n[{}]\n{}\n", block.id, block.text));
    }
    out.push_str("\nFull document for context:\n<note>\n");
    out.push_str(markdown);
    out.push_str("\n</note>");
    out
}
