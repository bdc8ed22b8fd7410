//! Session state: transcript, token accounting and export

pub mod conversation;
pub mod export;
pub mod tokens;

pub use conversation::{ConversationState, DEFAULT_MAX_CONTEXT_TOKENS};
pub use export::{export_transcript, render_markdown, ExportError};
pub use tokens::{TokenCounters, TokenLedger, TokenReport};
