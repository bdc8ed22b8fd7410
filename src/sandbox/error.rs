//! Sandbox error types

use std::path::PathBuf;

/// The isolated environment could not be created
///
/// Fatal to code-execution calls only; the session keeps running.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("failed to run {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("environment creation exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("interpreter not found at {0}")]
    MissingInterpreter(PathBuf),
}

/// Failure of the sandbox itself, as opposed to the code it ran
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}
