//! `edit_and_apply`: model-produced SEARCH/REPLACE edits
//!
//! The code-editor role receives the file and the instructions and answers
//! with blocks like:
//!
//! ```text
//! <<<<<<< SEARCH
//! old lines
//! =======
//! new lines
//! >>>>>>> REPLACE
//! ```
//!
//! Blocks are applied in order, each replacing the first exact match.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info_span, Instrument};

use crate::llm::tool_use::CODE_EDITOR_PROMPT;
use crate::llm::{ModelHost, ModelRequest, ModelRole, Turn, Usage};
use crate::metrics::observe_model_call;

use super::ToolError;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// One search/replace pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBlock {
    pub search: String,
    pub replace: String,
}

enum ParseState {
    Outside,
    Search(Vec<String>),
    Replace(Vec<String>, Vec<String>),
}

/// Extract every complete block from a model reply
pub fn parse_edit_blocks(reply: &str) -> Result<Vec<EditBlock>, String> {
    let mut blocks = Vec::new();
    let mut state = ParseState::Outside;

    for line in reply.lines() {
        let marker = line.trim_end();
        state = match state {
            ParseState::Outside if marker == SEARCH_MARKER => ParseState::Search(Vec::new()),
            ParseState::Outside => ParseState::Outside,
            ParseState::Search(search) if marker == DIVIDER => {
                ParseState::Replace(search, Vec::new())
            }
            ParseState::Search(mut search) => {
                search.push(line.to_string());
                ParseState::Search(search)
            }
            ParseState::Replace(search, replace) if marker == REPLACE_MARKER => {
                blocks.push(EditBlock {
                    search: search.join("\n"),
                    replace: replace.join("\n"),
                });
                ParseState::Outside
            }
            ParseState::Replace(search, mut replace) => {
                replace.push(line.to_string());
                ParseState::Replace(search, replace)
            }
        };
    }

    if !matches!(state, ParseState::Outside) {
        return Err("unterminated SEARCH/REPLACE block".to_string());
    }
    if blocks.is_empty() {
        return Err("no SEARCH/REPLACE blocks in editor reply".to_string());
    }
    Ok(blocks)
}

/// Apply `blocks` to `content`, failing on the first block that does not match
pub fn apply_edits(content: &str, blocks: &[EditBlock]) -> Result<String, String> {
    let mut updated = content.to_string();
    for (i, block) in blocks.iter().enumerate() {
        if block.search.is_empty() {
            return Err(format!("block {} has an empty SEARCH section", i + 1));
        }
        let Some(at) = updated.find(&block.search) else {
            return Err(format!(
                "block {} SEARCH text not found in file:\n{}",
                i + 1,
                block.search
            ));
        };
        updated.replace_range(at..at + block.search.len(), &block.replace);
    }
    Ok(updated)
}

/// Editor reply plus the usage of the call that produced it
#[derive(Debug)]
pub struct EditProposal {
    pub blocks: Result<Vec<EditBlock>, String>,
    pub usage: Usage,
}

/// Asks the code-editor role for edit blocks
pub struct CodeEditor {
    host: Arc<dyn ModelHost>,
    model: String,
    max_tokens: u32,
}

impl CodeEditor {
    pub fn new(host: Arc<dyn ModelHost>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            host,
            model: model.into(),
            max_tokens,
        }
    }

    /// Request edits for `content`; usage is returned even when parsing fails
    pub async fn request_edits(
        &self,
        path: &str,
        content: &str,
        instructions: &str,
    ) -> Result<EditProposal, ToolError> {
        let prompt = format!(
            "File: {}\n\n```\n{}\n```\n\nInstructions:\n{}",
            path, content, instructions
        );
        let request = ModelRequest {
            model: self.model.clone(),
            system: CODE_EDITOR_PROMPT.to_string(),
            turns: vec![Turn::user(prompt)],
            tools: Vec::new(),
            max_tokens: self.max_tokens,
        };

        let span = info_span!("code_editor_call", path = %path, otel.name = "code_editor_call");
        let start = Instant::now();
        let response = self.host.complete(request).instrument(span).await;
        observe_model_call(
            ModelRole::CodeEditor.as_str(),
            response.is_ok(),
            start.elapsed().as_secs_f64(),
        );
        let response = response?;
        let blocks = parse_edit_blocks(&response.text());
        debug!(path, ok = blocks.is_ok(), "Editor reply parsed");
        Ok(EditProposal {
            blocks,
            usage: response.usage,
        })
    }
}
