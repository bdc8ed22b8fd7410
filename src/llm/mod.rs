//! Model-host integration module
//!
//! This module provides the provider-neutral transcript types, the
//! `ModelHost` trait, the Anthropic Messages API client, and the fixed tool
//! registry advertised to the model.

pub mod anthropic;
pub mod error;
pub mod host;
pub mod roles;
pub mod tool_use;
pub mod types;

pub use anthropic::AnthropicHost;
pub use error::ModelHostError;
pub use host::ModelHost;
pub use roles::{ModelRole, RoleModels};
pub use types::{
    ContentBlock, ImageData, ModelRequest, ModelResponse, ToolCall, ToolPayload, ToolResult,
    ToolSchema, Turn, TurnRole, Usage,
};
