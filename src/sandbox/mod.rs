//! Sandboxed execution of model-generated code
//!
//! # Architecture
//!
//! ```text
//! ToolDispatcher ──execute_code──► SandboxedExecutor
//!                                      │
//!                   ┌──────────────────┼────────────────────┐
//!                   ▼                  ▼                    ▼
//!        EnvironmentProvisioner   run_with_timeout    ProcessRegistry
//!        (venv, created once)     (spawn/wait/kill)   (id → live process)
//! ```

pub mod environment;
pub mod error;
pub mod executor;
pub mod registry;

pub use environment::{EnvironmentHandle, EnvironmentProvisioner, DEFAULT_ENV_DIR};
pub use error::{ProvisioningError, SandboxError};
pub use executor::{
    run_with_timeout, ExecutionResult, ExecutionStatus, SandboxConfig, SandboxedExecutor,
    DEFAULT_EXEC_TIMEOUT,
};
pub use registry::{ExecutionGuard, ProcessInfo, ProcessKind, ProcessRegistry};
