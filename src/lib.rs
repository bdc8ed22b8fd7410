//! engineer - tool-using coding assistant with sandboxed code execution
//!
//! This library mediates between an operator and a hosted language model,
//! dispatching the model's tool calls against the local machine and running
//! generated code in an isolated Python environment under a timeout.
//!
//! # Modules
//!
//! - `agent` - Orchestration loop and automode
//! - `llm` - Model-host trait, Anthropic client, tool schemas and prompts
//! - `tools` - Tool dispatcher and the operations behind each tool
//! - `sandbox` - Environment provisioning, timed execution, process registry
//! - `security` - Command whitelist and privilege reduction
//! - `session` - Conversation state, token counters, transcript export
//! - `voice` - Speech-to-text and text-to-speech contracts
//! - `config` - Environment configuration
//! - `metrics` - Prometheus metrics for observability
//!
//! # Quick Start
//!
//! ```ignore
//! use engineer::{AgentConfig, Session};
//!
//! let mut session = Session::new(host, dispatcher, AgentConfig::default());
//! let result = session.submit("Create a hello world script and run it").await?;
//! println!("{}", result.final_response);
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod security;
pub mod session;
pub mod tools;
pub mod tracing;
pub mod voice;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentError, Session, SessionEvent};
pub use config::EngineConfig;
pub use sandbox::{ProcessRegistry, SandboxedExecutor};
pub use tools::ToolDispatcher;
