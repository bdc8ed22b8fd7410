//! Transcript and model-host types
//!
//! These types are provider-neutral: the orchestration loop, the tool
//! dispatcher and the transcript exporter all speak `Turn`/`ContentBlock`,
//! and each `ModelHost` implementation converts them to its wire format.

use serde::{Deserialize, Serialize};

/// Rough cost of one image block in the context-budget estimate
const IMAGE_TOKEN_ESTIMATE: usize = 1_600;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base64 image attached to a turn or a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    /// MIME type, e.g. "image/jpeg"
    pub media_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the result
    pub id: String,
    pub name: String,
    /// Named arguments (a JSON object)
    pub arguments: serde_json::Value,
}

/// Body of a tool result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageData>,
}

impl ToolPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// Outcome of one tool call, paired with the call by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub is_error: bool,
    pub payload: ToolPayload,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, payload: ToolPayload) -> Self {
        Self {
            call_id: call_id.into(),
            is_error: false,
            payload,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            is_error: true,
            payload: ToolPayload::text(message),
        }
    }
}

/// One block of turn content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { image: ImageData },
    ToolUse { call: ToolCall },
    ToolResult { result: ToolResult },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    fn estimated_tokens(&self) -> usize {
        match self {
            ContentBlock::Text { text } => text.len() / 4 + 1,
            ContentBlock::Image { .. } => IMAGE_TOKEN_ESTIMATE,
            ContentBlock::ToolUse { call } => {
                (call.name.len() + call.arguments.to_string().len()) / 4 + 1
            }
            ContentBlock::ToolResult { result } => {
                result.payload.text.len() / 4
                    + 1
                    + result.payload.images.len() * IMAGE_TOKEN_ESTIMATE
            }
        }
    }
}

/// One entry of the ordered transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub blocks: Vec<ContentBlock>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            blocks: vec![ContentBlock::text(text)],
        }
    }

    /// User turn carrying an image followed by its caption
    pub fn user_with_image(text: impl Into<String>, image: ImageData) -> Self {
        Self {
            role: TurnRole::User,
            blocks: vec![ContentBlock::Image { image }, ContentBlock::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            blocks: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: TurnRole::Assistant,
            blocks,
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: TurnRole::Tool,
            blocks: vec![ContentBlock::ToolResult { result }],
        }
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool calls carried by this turn, in order
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { call } => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.blocks.iter().map(ContentBlock::estimated_tokens).sum()
    }
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub input_schema: serde_json::Value,
}

/// Token usage reported by the model host for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens written to the prompt cache (absolute, per call)
    pub cache_write_tokens: u64,
    /// Tokens served from the prompt cache (absolute, per call)
    pub cache_read_tokens: u64,
}

/// A single request to the model host
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
}

/// The model host's reply to a `ModelRequest`
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Why generation stopped ("end_turn", "tool_use", "max_tokens", ...)
    pub stop_reason: Option<String>,
    /// Text and tool-use blocks in emitted order
    pub blocks: Vec<ContentBlock>,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { call } => Some(call.clone()),
                _ => None,
            })
            .collect()
    }
}
