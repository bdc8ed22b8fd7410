//! Tool dispatch
//!
//! Routes model-issued tool calls to exactly one local operation and turns
//! every outcome, including failures, into a `ToolResult`.
//!
//! # Architecture
//!
//! ```text
//! ToolCall{name, arguments}
//!        │
//!        ▼
//! ToolDispatcher::dispatch() ──► files   (create_folders, create_files, read_files)
//!        │                  ──► sandbox (run_shell_command, stop_process, execute_code)
//!        │                  ──► editor  (edit_and_apply, via the code-editor role)
//!        │                  ──► search  (tavily_search)
//!        ▼
//! DispatchOutcome{result, usage}
//! ```

pub mod dispatcher;
pub mod editor;
pub mod files;
pub mod image;
pub mod search;

use crate::llm::{ModelHostError, ModelRole, ToolResult, Usage};
use crate::sandbox::SandboxError;
use crate::security::CommandNotAllowed;

pub use dispatcher::{DispatcherConfig, ToolDispatcher};
pub use search::{SearchBackend, SearchError, SearchHit, TavilySearch, UnconfiguredSearch};

/// Any failure inside a tool; becomes an error `ToolResult`, never escapes
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error(transparent)]
    CommandNotAllowed(#[from] CommandNotAllowed),

    #[error("No running process with id {0}")]
    ProcessNotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Search failed: {0}")]
    Search(#[from] SearchError),

    #[error("Image processing failed for {path}: {message}")]
    Image { path: String, message: String },

    #[error("Edit failed for {path}: {message}")]
    Edit { path: String, message: String },

    #[error("Model call failed: {0}")]
    Model(#[from] ModelHostError),
}

impl ToolError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        ToolError::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Result of one dispatch plus the usage of any secondary model calls
///
/// The dispatcher never touches the token counters; the loop folds `usage`
/// in so it stays the only writer.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub result: ToolResult,
    pub usage: Vec<(ModelRole, Usage)>,
}
