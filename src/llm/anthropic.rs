//! Anthropic Messages API client with prompt caching
//!
//! Converts the provider-neutral transcript into `/v1/messages` requests.
//! The system prompt and the tool list are marked `cache_control: ephemeral`
//! so repeated calls in one session are served from the prompt cache; the
//! response usage reports cache writes/reads as absolute per-call values.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ModelHostError;
use super::host::ModelHost;
use super::types::{
    ContentBlock, ModelRequest, ModelResponse, ToolCall, ToolSchema, Turn, TurnRole, Usage,
};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Client for Anthropic's `/v1/messages` endpoint
#[derive(Clone)]
pub struct AnthropicHost {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

impl AnthropicHost {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";

    /// Create a new client
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `base_url` - API base URL (e.g., "https://api.anthropic.com")
    /// * `timeout` - Per-request wall-clock bound
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelHostError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_version: Self::DEFAULT_API_VERSION.to_string(),
        })
    }
}

#[async_trait]
impl ModelHost for AnthropicHost {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelHostError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = to_request(&request);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ModelHostError::Api { status, message });
        }

        let text = response.text().await?;
        let parsed: Response =
            serde_json::from_str(&text).map_err(|e| ModelHostError::Decode(e.to_string()))?;
        Ok(from_response(parsed))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    system: Vec<SystemBlock>,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<RequestTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    cache_control: Value,
}

#[derive(Debug, Serialize)]
struct RequestTool {
    name: String,
    description: String,
    input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<Value>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Response {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

// ============================================================================
// Conversions
// ============================================================================

fn ephemeral() -> Value {
    serde_json::json!({"type": "ephemeral"})
}

fn wire_role(role: TurnRole) -> &'static str {
    match role {
        TurnRole::Assistant => "assistant",
        // Tool results travel as user content in the Messages API
        TurnRole::User | TurnRole::Tool => "user",
    }
}

fn wire_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::Image { image } => serde_json::json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.media_type,
                "data": image.data,
            }
        }),
        ContentBlock::ToolUse { call } => serde_json::json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.arguments,
        }),
        ContentBlock::ToolResult { result } => {
            let mut content = vec![serde_json::json!({
                "type": "text",
                "text": result.payload.text,
            })];
            for image in &result.payload.images {
                content.push(serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.media_type,
                        "data": image.data,
                    }
                }));
            }
            serde_json::json!({
                "type": "tool_result",
                "tool_use_id": result.call_id,
                "content": content,
                "is_error": result.is_error,
            })
        }
    }
}

/// Fold turns into alternating wire messages
///
/// Consecutive turns that map to the same wire role are merged, so every tool
/// result of one round lands in a single user message.
fn to_messages(turns: &[Turn]) -> Vec<RequestMessage> {
    let mut messages: Vec<RequestMessage> = Vec::new();
    for turn in turns {
        let role = wire_role(turn.role);
        let blocks: Vec<Value> = turn.blocks.iter().map(wire_block).collect();
        if blocks.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(RequestMessage {
                role,
                content: blocks,
            }),
        }
    }
    messages
}

fn to_tools(tools: &[ToolSchema]) -> Vec<RequestTool> {
    let last = tools.len().saturating_sub(1);
    tools
        .iter()
        .enumerate()
        .map(|(i, t)| RequestTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
            // A breakpoint on the last tool caches the whole tool list
            cache_control: (i == last).then(ephemeral),
        })
        .collect()
}

fn to_request(request: &ModelRequest) -> Request {
    let tools = to_tools(&request.tools);
    let tool_choice = (!tools.is_empty()).then(|| serde_json::json!({"type": "auto"}));
    Request {
        model: request.model.clone(),
        max_tokens: request.max_tokens,
        system: vec![SystemBlock {
            block_type: "text",
            text: request.system.clone(),
            cache_control: ephemeral(),
        }],
        messages: to_messages(&request.turns),
        tools,
        tool_choice,
    }
}

fn from_response(response: Response) -> ModelResponse {
    let blocks = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
            ResponseBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                call: ToolCall {
                    id,
                    name,
                    arguments: input,
                },
            }),
            ResponseBlock::Other => None,
        })
        .collect();

    ModelResponse {
        stop_reason: response.stop_reason,
        blocks,
        usage: Usage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_write_tokens: response.usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: response.usage.cache_read_input_tokens.unwrap_or(0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ToolPayload, ToolResult};

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "read_files".to_string(),
            arguments: serde_json::json!({"paths": ["x"]}),
        }
    }

    #[test]
    fn test_tool_results_merge_into_one_user_message() {
        let turns = vec![
            Turn::user("read two files"),
            Turn::assistant_blocks(vec![
                ContentBlock::ToolUse { call: call("a") },
                ContentBlock::ToolUse { call: call("b") },
            ]),
            Turn::tool_result(ToolResult::success("a", ToolPayload::text("one"))),
            Turn::tool_result(ToolResult::error("b", "missing")),
        ];

        let messages = to_messages(&turns);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content.len(), 2);
        assert_eq!(messages[2].content[0]["tool_use_id"], "a");
        assert_eq!(messages[2].content[1]["is_error"], true);
    }

    #[test]
    fn test_request_marks_cache_breakpoints() {
        let request = ModelRequest {
            model: "m".to_string(),
            system: "be helpful".to_string(),
            turns: vec![Turn::user("hi")],
            tools: vec![
                ToolSchema {
                    name: "a".to_string(),
                    description: "first".to_string(),
                    input_schema: serde_json::json!({"type": "object"}),
                },
                ToolSchema {
                    name: "b".to_string(),
                    description: "second".to_string(),
                    input_schema: serde_json::json!({"type": "object"}),
                },
            ],
            max_tokens: 1024,
        };

        let json = serde_json::to_value(to_request(&request)).unwrap();
        assert_eq!(json["system"][0]["cache_control"]["type"], "ephemeral");
        assert!(json["tools"][0].get("cache_control").is_none());
        assert_eq!(json["tools"][1]["cache_control"]["type"], "ephemeral");
        assert_eq!(json["tool_choice"]["type"], "auto");
    }

    #[test]
    fn test_response_parsing_with_cache_usage() {
        let body = r#"{
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Running it."},
                {"type": "tool_use", "id": "toolu_1", "name": "execute_code", "input": {"code": "print(1)"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7,
                      "cache_creation_input_tokens": 300, "cache_read_input_tokens": null}
        }"#;

        let parsed: Response = serde_json::from_str(body).unwrap();
        let response = from_response(parsed);
        assert_eq!(response.blocks.len(), 2);
        assert_eq!(response.text(), "Running it.");
        assert_eq!(response.tool_calls()[0].id, "toolu_1");
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(response.usage.cache_write_tokens, 300);
        assert_eq!(response.usage.cache_read_tokens, 0);
    }
}
