//! Streaming Block Extractor
//!
//! In block mode the model answers with one JSON object keyed by block id,
//! each value an array of annotations. The extractor watches the growing
//! response buffer and hands out a block as soon as its value is complete,
//! without waiting for the whole object.
//!
//! Key detection is a regex scan, so a block whose text contains another
//! block's `"<id>":` pattern can produce a wrong boundary. Blocks that never
//! complete incrementally are recovered by `finish` from the full buffer.

use regex::Regex;

use super::parser::parse_json_response;
use super::repair::repair_json;
use crate::utils::error::AppResult;

/// A block whose value parsed successfully
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedBlock {
    pub id: String,
    pub value: serde_json::Value,
}

struct TrackedBlock {
    id: String,
    key_pattern: Option<Regex>,
    completed: bool,
}

/// Incremental per-key extractor over a growing buffer
pub struct BlockExtractor {
    blocks: Vec<TrackedBlock>,
}

/// `"<id>":` allowing whitespace inside the quotes and before the colon
fn key_pattern(id: &str) -> Option<Regex> {
    let pattern = format!(r#""\s*{}\s*"\s*:"#, regex::escape(id));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(block_id = %id, error = %e, "Could not build block key pattern");
            None
        }
    }
}

impl BlockExtractor {
    /// Track the given block ids, in declared order.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let blocks = ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                TrackedBlock {
                    key_pattern: key_pattern(&id),
                    id,
                    completed: false,
                }
            })
            .collect();
        Self { blocks }
    }

    pub fn mark_complete(&mut self, id: &str) {
        if let Some(block) = self.blocks.iter_mut().find(|b| b.id == id) {
            block.completed = true;
        }
    }

    pub fn is_complete(&self, id: &str) -> bool {
        self.blocks.iter().any(|b| b.id == id && b.completed)
    }

    /// Ids not yet completed, in declared order
    pub fn pending_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter(|b| !b.completed)
            .map(|b| b.id.as_str())
            .collect()
    }

    /// Return the first pending block (in declared order) whose value is
    /// complete in `buffer`, and mark it complete. At most one block per call.
    pub fn extract(&mut self, buffer: &str) -> Option<CompletedBlock> {
        let index = (0..self.blocks.len())
            .filter(|&i| !self.blocks[i].completed)
            .find_map(|i| self.try_complete(i, buffer).map(|value| (i, value)))?;

        let (i, value) = index;
        self.blocks[i].completed = true;
        tracing::debug!(block_id = %self.blocks[i].id, "Block completed while streaming");
        Some(CompletedBlock {
            id: self.blocks[i].id.clone(),
            value,
        })
    }

    fn try_complete(&self, index: usize, buffer: &str) -> Option<serde_json::Value> {
        let block = &self.blocks[index];
        let key_match = block.key_pattern.as_ref()?.find(buffer)?;
        let value_start = key_match.end();

        // The value ends where the next other key begins, if one has streamed in
        let boundary = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .filter_map(|(_, other)| other.key_pattern.as_ref())
            .filter_map(|re| re.find_at(buffer, value_start))
            .map(|m| m.start())
            .min();

        let candidate = buffer[value_start..boundary.unwrap_or(buffer.len())].trim();
        let candidate = candidate.strip_suffix(',').unwrap_or(candidate).trim_end();
        if !candidate.ends_with(']') {
            return None;
        }
        // Running to end of buffer, a `]` may close an inner array only
        if boundary.is_none() && !brackets_balanced(candidate) {
            return None;
        }

        let id_json = serde_json::to_string(&block.id).ok()?;
        let wrapped = repair_json(&format!("{{{}:{}}}", id_json, candidate));
        let mut parsed: serde_json::Value = serde_json::from_str(&wrapped).ok()?;
        parsed.get_mut(block.id.as_str()).map(serde_json::Value::take)
    }

    /// Recover every still-pending block from the complete buffer.
    ///
    /// Parses the whole buffer (with repair); pending ids present in the
    /// resulting object are returned in declared order and marked complete.
    pub fn finish(&mut self, buffer: &str) -> AppResult<Vec<CompletedBlock>> {
        if self.blocks.iter().all(|b| b.completed) {
            return Ok(Vec::new());
        }

        let parsed = parse_json_response(buffer)?;
        let mut recovered = Vec::new();
        for block in self.blocks.iter_mut().filter(|b| !b.completed) {
            if let Some(value) = parsed.get(block.id.as_str()) {
                block.completed = true;
                recovered.push(CompletedBlock {
                    id: block.id.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(recovered)
    }
}

/// String-aware check that every `[`/`{` in `text` is closed
fn brackets_balanced(text: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth == 0 && !in_string
}
