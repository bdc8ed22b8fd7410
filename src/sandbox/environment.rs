//! Isolated interpreter environment
//!
//! A Python virtualenv at a well-known path, created on first use and reused
//! afterwards. venv ships pip, which is the package-install capability the
//! executed code gets.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::error::ProvisioningError;

/// Default environment directory, relative to the working directory
pub const DEFAULT_ENV_DIR: &str = "code_execution_env";

/// A ready-to-use environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    /// Environment root (becomes `VIRTUAL_ENV`)
    pub root: PathBuf,
    /// Interpreter executable inside the environment
    pub interpreter: PathBuf,
}

impl EnvironmentHandle {
    /// Wrap an existing interpreter; its parent directory's parent is the root
    pub fn from_interpreter(interpreter: impl Into<PathBuf>) -> Self {
        let interpreter = interpreter.into();
        let root = interpreter
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self { root, interpreter }
    }

    /// Directory holding the environment's executables
    pub fn bin_dir(&self) -> PathBuf {
        self.interpreter
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone())
    }

    /// Bind a command to this environment, like sourcing `activate`
    pub fn apply_env(&self, command: &mut Command) {
        let mut paths = vec![self.bin_dir()];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        if let Ok(joined) = std::env::join_paths(paths) {
            command.env("PATH", joined);
        }
        command
            .env("VIRTUAL_ENV", &self.root)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env_remove("PYTHONHOME");
    }
}

/// Interpreter path inside a venv rooted at `root`
pub fn venv_interpreter(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("Scripts").join("python.exe")
    } else {
        root.join("bin").join("python")
    }
}

/// Creates the environment once and hands out handles to it
pub struct EnvironmentProvisioner {
    root: PathBuf,
    base_python: String,
    cached: Mutex<Option<EnvironmentHandle>>,
}

impl EnvironmentProvisioner {
    /// # Arguments
    /// * `root` - Where the venv lives (e.g. `./code_execution_env`)
    /// * `base_python` - Interpreter used to create it (e.g. "python3")
    pub fn new(root: impl Into<PathBuf>, base_python: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_python: base_python.into(),
            cached: Mutex::new(None),
        }
    }

    /// Provisioner that always returns `handle` without creating anything
    pub fn with_handle(handle: EnvironmentHandle) -> Self {
        Self {
            root: handle.root.clone(),
            base_python: String::new(),
            cached: Mutex::new(Some(handle)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle if the environment has already been provisioned
    pub async fn current(&self) -> Option<EnvironmentHandle> {
        self.cached.lock().await.clone()
    }

    /// Reuse the environment if it exists, else create it
    ///
    /// Concurrent callers queue on the lock, so creation runs at most once.
    pub async fn ensure_environment(&self) -> Result<EnvironmentHandle, ProvisioningError> {
        let mut cached = self.cached.lock().await;
        if let Some(handle) = cached.as_ref() {
            return Ok(handle.clone());
        }

        let interpreter = venv_interpreter(&self.root);
        if tokio::fs::try_exists(&interpreter).await.unwrap_or(false) {
            debug!(root = %self.root.display(), "Reusing existing environment");
        } else {
            self.create().await?;
            if !tokio::fs::try_exists(&interpreter).await.unwrap_or(false) {
                return Err(ProvisioningError::MissingInterpreter(interpreter));
            }
        }

        let handle = EnvironmentHandle {
            root: self.root.clone(),
            interpreter,
        };
        *cached = Some(handle.clone());
        Ok(handle)
    }

    async fn create(&self) -> Result<(), ProvisioningError> {
        info!(
            root = %self.root.display(),
            python = %self.base_python,
            "Creating code execution environment"
        );

        let output = Command::new(&self.base_python)
            .arg("-m")
            .arg("venv")
            .arg(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ProvisioningError::Spawn {
                interpreter: self.base_python.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProvisioningError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_from_interpreter() {
        let handle = EnvironmentHandle::from_interpreter("/opt/env/bin/python");
        assert_eq!(handle.root, PathBuf::from("/opt/env"));
        assert_eq!(handle.bin_dir(), PathBuf::from("/opt/env/bin"));
    }

    #[cfg(unix)]
    #[test]
    fn test_venv_interpreter_path() {
        assert_eq!(
            venv_interpreter(Path::new("/w/code_execution_env")),
            PathBuf::from("/w/code_execution_env/bin/python")
        );
    }

    #[tokio::test]
    async fn test_with_handle_skips_creation() {
        let handle = EnvironmentHandle::from_interpreter("/bin/sh");
        let provisioner = EnvironmentProvisioner::with_handle(handle.clone());
        assert_eq!(provisioner.ensure_environment().await.unwrap(), handle);
        assert_eq!(provisioner.current().await, Some(handle));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reuses_existing_environment() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = venv_interpreter(dir.path());
        std::fs::create_dir_all(interpreter.parent().unwrap()).unwrap();
        std::fs::write(&interpreter, "").unwrap();

        // A bogus base interpreter proves nothing was spawned
        let provisioner = EnvironmentProvisioner::new(dir.path(), "/nonexistent/python");
        let handle = provisioner.ensure_environment().await.unwrap();
        assert_eq!(handle.interpreter, interpreter);
    }

    #[tokio::test]
    async fn test_missing_base_python_is_provisioning_error() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner =
            EnvironmentProvisioner::new(dir.path().join("env"), "/nonexistent/python");
        let err = provisioner.ensure_environment().await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Spawn { .. }));
        assert!(provisioner.current().await.is_none());
    }

    #[tokio::test]
    #[ignore = "requires python3 with the venv module"]
    async fn test_creates_real_venv() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = EnvironmentProvisioner::new(dir.path().join("env"), "python3");
        let handle = provisioner.ensure_environment().await.unwrap();
        assert!(handle.interpreter.exists());
    }
}
