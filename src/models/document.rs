//! Document Models
//!
//! The editor hands the analyzer ordered blocks of plain text plus a
//! flattened markdown rendering of the whole document.

use serde::{Deserialize, Serialize};

/// One block of the document, keyed by a stable id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentBlock {
    pub id: String,
    pub text: String,
}

impl DocumentBlock {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Split markdown into blocks on blank lines, with ids `b1`, `b2`, ...
pub fn split_blocks(markdown: &str) -> Vec<DocumentBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in markdown.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    blocks
        .into_iter()
        .enumerate()
        .map(|(i, text)| DocumentBlock::new(format!("b{}", i + 1), text))
        .collect()
}
