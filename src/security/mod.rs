//! Security module for the sandboxed tools
//!
//! This module provides the containment primitives applied to anything the
//! model asks to run:
//! - Command sanitizing and whitelisting (shell commands)
//! - Privilege reduction (forked children)
//!
//! # Security Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 1: COMMAND WHITELIST                                     │
//! │  sanitize() → parse() → program + argv, never a shell           │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 2: PRIVILEGE DROP (in forked child, before exec)         │
//! │  setgid when root, optional capability clear on Linux           │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 3: WALL-CLOCK TIMEOUT (sandbox::executor)                │
//! │  process group SIGKILL + reap on expiry                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod privilege;

pub use command::{
    default_whitelist, parse, sanitize, validate, ArgPolicy, CommandDescriptor,
    CommandNotAllowed, ParsedCommand,
};
pub use privilege::{PrivilegePolicy, DEFAULT_SANDBOX_GID};
