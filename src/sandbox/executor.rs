//! Sandboxed code execution
//!
//! ```text
//! execute(source, timeout)
//!     │
//!     ├─► ensure_environment()          (venv, created once)
//!     ├─► tempfile exec_XXXX.py         (in the isolated workdir)
//!     ├─► spawn interpreter             (own process group, stdin closed,
//!     │                                   VIRTUAL_ENV/PATH bound, privilege drop)
//!     ├─► wait ≤ timeout ──expired──► killpg(SIGKILL) + reap → TimedOut
//!     ├─► killpg(SIGKILL) on exit too   (nothing it forked survives the call)
//!     └─► temp file removed             (TempPath drop, every exit path)
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION};
use crate::security::{ParsedCommand, PrivilegePolicy};

use super::environment::EnvironmentProvisioner;
use super::error::SandboxError;
use super::registry::{ProcessInfo, ProcessRegistry};

/// Default wall-clock bound for one execution
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-stream capture limit; output past this is discarded
const OUTPUT_LIMIT: usize = 1024 * 1024;

/// How long to wait for pipes to close after the child is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How a sandboxed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Exited on its own; negative codes are `-signal` on Unix
    Exited(i32),
    /// Killed by the executor after the timeout
    TimedOut,
}

/// Captured result of one sandboxed run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub status: ExecutionStatus,
    pub duration_ms: f64,
}

impl ExecutionResult {
    pub fn timed_out(&self) -> bool {
        self.status == ExecutionStatus::TimedOut
    }

    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Exited(0)
    }

    /// Text handed back to the model
    pub fn render(&self) -> String {
        let code = match self.status {
            ExecutionStatus::Exited(code) => code.to_string(),
            ExecutionStatus::TimedOut => "Timed out".to_string(),
        };
        let mut stderr = self.stderr.clone();
        if self.timed_out() {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str("Execution timed out.");
        }
        format!(
            "Stdout:\n{}\n\nStderr:\n{}\n\nReturn Code: {}",
            self.stdout, stderr, code
        )
    }

    fn status_label(&self) -> &'static str {
        match self.status {
            ExecutionStatus::Exited(0) => "success",
            ExecutionStatus::Exited(_) => "error",
            ExecutionStatus::TimedOut => "timeout",
        }
    }
}

/// Where and how sandboxed processes run
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Working directory for executions and shell commands
    pub workdir: PathBuf,
    /// Directory for background process logs
    pub log_dir: PathBuf,
    pub privilege: PrivilegePolicy,
}

impl SandboxConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        Self {
            log_dir: workdir.join("process_logs"),
            workdir,
            privilege: PrivilegePolicy::default(),
        }
    }
}

/// Runs model-generated code and whitelisted commands
pub struct SandboxedExecutor {
    provisioner: Arc<EnvironmentProvisioner>,
    registry: ProcessRegistry,
    config: SandboxConfig,
}

impl SandboxedExecutor {
    pub fn new(
        provisioner: Arc<EnvironmentProvisioner>,
        registry: ProcessRegistry,
        config: SandboxConfig,
    ) -> Self {
        Self {
            provisioner,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `source` with the environment's interpreter under `timeout`
    ///
    /// Errors only when the sandbox itself fails (provisioning, temp file,
    /// spawn). Anything the code does, including hanging, is an `Ok` result.
    pub async fn execute(
        &self,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        let env = self.provisioner.ensure_environment().await?;
        tokio::fs::create_dir_all(&self.config.workdir).await?;

        let mut file = tempfile::Builder::new()
            .prefix("exec_")
            .suffix(".py")
            .tempfile_in(&self.config.workdir)?;
        file.write_all(source.as_bytes())?;
        file.flush()?;
        // Close our handle; the path (and the file) lives until `script` drops
        let script = file.into_temp_path();

        let mut cmd = Command::new(&env.interpreter);
        cmd.arg(&*script).current_dir(&self.config.workdir);
        env.apply_env(&mut cmd);
        self.config.privilege.apply_to(&mut cmd);

        debug!(script = %script.display(), code_len = source.len(), "Executing code");
        let result = run_with_timeout(cmd, timeout, &self.registry, "execute_code").await;

        if let Err(e) = script.close() {
            warn!(error = %e, "Failed to remove execution script");
        }

        let result = result?;
        record_metrics(&result);
        info!(
            status = result.status_label(),
            duration_ms = result.duration_ms,
            "Code execution finished"
        );
        Ok(result)
    }

    /// Run a whitelisted command in the foreground under `timeout`
    pub async fn run_command(
        &self,
        parsed: &ParsedCommand,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        let cmd = self.command_for(parsed).await?;
        let result = run_with_timeout(cmd, timeout, &self.registry, &parsed.to_string()).await?;
        record_metrics(&result);
        Ok(result)
    }

    /// Start a whitelisted command in the background, logging to a file
    pub async fn spawn_background(
        &self,
        parsed: &ParsedCommand,
    ) -> Result<ProcessInfo, SandboxError> {
        tokio::fs::create_dir_all(&self.config.log_dir).await?;
        let id = Uuid::now_v7().to_string();
        let log_path = self.config.log_dir.join(format!("{}.log", id));
        let log = std::fs::File::create(&log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = self.command_for(parsed).await?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: parsed.program.clone(),
            source,
        })?;
        Ok(self
            .registry
            .register_background(id, parsed.to_string(), child, log_path))
    }

    async fn command_for(&self, parsed: &ParsedCommand) -> Result<Command, SandboxError> {
        tokio::fs::create_dir_all(&self.config.workdir).await?;
        let mut cmd = Command::new(&parsed.program);
        cmd.args(&parsed.args).current_dir(&self.config.workdir);
        // `pip list` and `python --version` should see the sandbox, once it exists
        if let Some(env) = self.provisioner.current().await {
            env.apply_env(&mut cmd);
        }
        self.config.privilege.apply_to(&mut cmd);
        Ok(cmd)
    }
}

fn record_metrics(result: &ExecutionResult) {
    CODE_EXECUTIONS
        .with_label_values(&[result.status_label()])
        .inc();
    CODE_EXECUTION_DURATION.observe(result.duration_ms / 1000.0);
}

/// Spawn `cmd`, capture its output, and kill it if `timeout` expires
///
/// The child gets its own process group so anything it forks dies with it.
/// It is tracked in `registry` for as long as this call runs.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    registry: &ProcessRegistry,
    label: &str,
) -> Result<ExecutionResult, SandboxError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|source| SandboxError::Spawn { program, source })?;
    // `child.id()` is gone once the child is reaped; the group outlives it
    let pid = child.id();
    let _tracked = registry.track_execution(label, pid);

    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let readers = [
        spawn_reader(child.stdout.take(), stdout.clone()),
        spawn_reader(child.stderr.take(), stderr.clone()),
    ];

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            kill_group(pid);
            ExecutionStatus::Exited(exit_code(status))
        }
        Ok(Err(e)) => {
            kill_tree(&mut child).await;
            return Err(SandboxError::Wait(e));
        }
        Err(_) => {
            warn!(label, timeout_secs = timeout.as_secs_f64(), "Process timed out, killing");
            kill_tree(&mut child).await;
            ExecutionStatus::TimedOut
        }
    };

    for mut reader in readers {
        // A grandchild outside the group could still hold the pipe open
        if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    }

    Ok(ExecutionResult {
        stdout: take_lossy(&stdout),
        stderr: take_lossy(&stderr),
        status,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

fn spawn_reader<R>(pipe: Option<R>, buf: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut buf = buf.lock().unwrap_or_else(|e| e.into_inner());
                    let room = OUTPUT_LIMIT.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    })
}

fn take_lossy(buf: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(|e| e.into_inner()));
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| -s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// SIGKILL every process in the group led by `pid`
///
/// ESRCH (group already empty) is the common case after a clean exit.
#[cfg(unix)]
pub(crate) fn kill_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "killpg failed"),
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_group(pid: Option<u32>) {
    debug!(?pid, "Process-group kill is unsupported on this platform");
}

/// SIGKILL the child's process group, then kill and reap the child itself
pub(crate) async fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    // Also waits, so the child never lingers as a zombie
    let _ = child.kill().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sandbox::environment::EnvironmentHandle;
    use crate::security::{default_whitelist, parse};

    /// Executor whose "interpreter" is /bin/sh, so tests need no Python
    fn shell_executor(dir: &std::path::Path) -> SandboxedExecutor {
        let provisioner = EnvironmentProvisioner::with_handle(EnvironmentHandle::from_interpreter(
            "/bin/sh",
        ));
        let mut config = SandboxConfig::new(dir);
        config.privilege = PrivilegePolicy::none();
        SandboxedExecutor::new(Arc::new(provisioner), ProcessRegistry::new(), config)
    }

    fn leftover_scripts(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("exec_"))
            .count()
    }

    #[tokio::test]
    async fn test_execute_captures_output_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let executor = shell_executor(dir.path());

        let result = executor
            .execute("echo hello\necho oops >&2\nexit 3\n", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(result.status, ExecutionStatus::Exited(3));
        assert!(!result.timed_out());
        assert_eq!(leftover_scripts(dir.path()), 0);
        assert!(executor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let executor = shell_executor(dir.path());

        let start = Instant::now();
        let result = executor
            .execute("echo started\nsleep 30\n", Duration::from_millis(300))
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(result.render().contains("Return Code: Timed out"));
        assert_eq!(leftover_scripts(dir.path()), 0);
        assert!(executor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_execute_kills_forked_processes_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let executor = shell_executor(dir.path());
        let marker = dir.path().join("alive");

        let source = format!(
            "(sleep 1; touch '{}') >/dev/null 2>&1 &\necho done\n",
            marker.display()
        );
        let result = executor
            .execute(&source, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Exited(0));
        assert_eq!(result.stdout, "done\n");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked process outlived execute");
    }

    #[tokio::test]
    async fn test_execute_spawn_failure_removes_script() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = EnvironmentProvisioner::with_handle(EnvironmentHandle::from_interpreter(
            "/nonexistent/python",
        ));
        let mut config = SandboxConfig::new(dir.path());
        config.privilege = PrivilegePolicy::none();
        let executor = SandboxedExecutor::new(Arc::new(provisioner), ProcessRegistry::new(), config);

        let err = executor
            .execute("print('never')", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
        assert_eq!(leftover_scripts(dir.path()), 0);
        assert!(executor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_render_format() {
        let result = ExecutionResult {
            stdout: "1\n".to_string(),
            stderr: String::new(),
            status: ExecutionStatus::Exited(0),
            duration_ms: 1.0,
        };
        assert_eq!(result.render(), "Stdout:\n1\n\n\nStderr:\n\n\nReturn Code: 0");
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_run_command() {
        let dir = tempfile::tempdir().unwrap();
        let executor = shell_executor(dir.path());
        let parsed = parse("echo hi there", &default_whitelist()).unwrap();

        let result = executor
            .run_command(&parsed, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.stdout, "hi there\n");
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let registry = ProcessRegistry::new();
        let cmd = Command::new("/nonexistent/binary");
        let err = run_with_timeout(cmd, Duration::from_secs(1), &registry, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_background_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let executor = shell_executor(dir.path());
        let parsed = parse("echo background", &default_whitelist()).unwrap();

        let info = executor.spawn_background(&parsed).await.unwrap();
        let log_path = info.log_path.clone().unwrap();

        for _ in 0..100 {
            if executor.registry().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(std::fs::read_to_string(log_path).unwrap(), "background\n");
    }

    #[tokio::test]
    #[ignore = "requires python3 with the venv module"]
    async fn test_execute_python_in_venv() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = EnvironmentProvisioner::new(dir.path().join("env"), "python3");
        let mut config = SandboxConfig::new(dir.path());
        config.privilege = PrivilegePolicy::none();
        let executor = SandboxedExecutor::new(Arc::new(provisioner), ProcessRegistry::new(), config);

        let result = executor
            .execute("import sys\nprint(sys.prefix)", DEFAULT_EXEC_TIMEOUT)
            .await
            .unwrap();
        assert!(result.success());
        assert!(result.stdout.contains("env"));
    }
}
