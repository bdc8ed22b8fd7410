//! Agent module: the tool-call orchestration loop
//!
//! This module provides the session that orchestrates:
//! - The hosted model with tool calling (Messages API)
//! - The tool dispatcher (files, shell, sandboxed code, edits, search)
//! - Automode: repeated autonomous turns until a sentinel or a cap
//!
//! # Architecture
//!
//! ```text
//! Operator input → Session → ModelHost::complete (transcript + tools)
//!                     ↓
//!          text only? ── yes ──→ Idle (reply shown, TTS optional)
//!                     ↓ no
//!          ToolDispatcher::dispatch() for each call, in order
//!                     ↓
//!          ToolResult turns appended → ModelHost (tool-checker role)
//!                     ↓
//!          Automode: CONTINUATION_PROMPT → next round,
//!                    until AUTOMODE_COMPLETE or the iteration cap
//! ```

pub mod controller;

pub use controller::{
    AgentConfig, AgentError, AgentResult, AutomodeOutcome, AutomodeResult, LoopState, Session,
    SessionEvent,
};
