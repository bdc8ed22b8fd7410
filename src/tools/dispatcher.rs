//! Tool dispatcher: one named call → one operation → one `ToolResult`

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};

use crate::llm::tool_use::{
    self, CODE_EXECUTION_PROMPT, CREATE_FILES, CREATE_FOLDERS, EDIT_AND_APPLY, EXECUTE_CODE,
    READ_FILES, RUN_SHELL_COMMAND, STOP_PROCESS, TAVILY_SEARCH,
};
use crate::llm::{
    ModelHost, ModelRequest, ModelRole, RoleModels, ToolCall, ToolPayload, ToolResult, ToolSchema,
    Turn, Usage,
};
use crate::metrics::{observe_model_call, TOOL_CALLS, TOOL_CALL_DURATION};
use crate::sandbox::{ExecutionResult, ProcessRegistry, SandboxedExecutor, DEFAULT_EXEC_TIMEOUT};
use crate::security::{self, CommandDescriptor};

use super::editor::{apply_edits, CodeEditor};
use super::files::{write_file, BatchReport, FileOps, FileSpec};
use super::search::{format_hits, SearchBackend};
use super::{DispatchOutcome, ToolError};

/// Tunables for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Wall-clock bound for `execute_code`
    pub exec_timeout: Duration,
    /// Wall-clock bound for foreground shell commands
    pub command_timeout: Duration,
    pub whitelist: Vec<CommandDescriptor>,
    /// Ask the code-execution role to explain each run
    pub analyze_executions: bool,
    pub models: RoleModels,
    /// Output cap for secondary model calls
    pub max_tokens: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            command_timeout: Duration::from_secs(30),
            whitelist: security::default_whitelist(),
            analyze_executions: true,
            models: RoleModels::default(),
            max_tokens: 8000,
        }
    }
}

/// What an operation produced, before it is paired with the call id
struct Output {
    payload: ToolPayload,
    is_error: bool,
}

impl Output {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            payload: ToolPayload::text(text),
            is_error: false,
        }
    }
}

impl From<BatchReport> for Output {
    fn from(report: BatchReport) -> Self {
        let is_error = report.failed();
        Self {
            payload: report.payload,
            is_error,
        }
    }
}

#[derive(Deserialize)]
struct PathsArgs {
    paths: Vec<String>,
}

#[derive(Deserialize)]
struct FilesArgs {
    files: Vec<FileSpec>,
}

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    background: bool,
}

#[derive(Deserialize)]
struct StopArgs {
    process_id: String,
}

#[derive(Deserialize)]
struct CodeArgs {
    code: String,
}

#[derive(Deserialize)]
struct EditArgs {
    path: String,
    instructions: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

/// Routes tool calls to their operations
pub struct ToolDispatcher {
    files: FileOps,
    executor: Arc<SandboxedExecutor>,
    search: Arc<dyn SearchBackend>,
    host: Arc<dyn ModelHost>,
    editor: CodeEditor,
    config: DispatcherConfig,
}

impl ToolDispatcher {
    /// # Arguments
    /// * `executor` - Sandbox for code and shell commands; its workdir is the project root
    /// * `search` - Web search backend
    /// * `host` - Model host for the code-editor and code-execution roles
    /// * `config` - Timeouts, whitelist and role models
    pub fn new(
        executor: Arc<SandboxedExecutor>,
        search: Arc<dyn SearchBackend>,
        host: Arc<dyn ModelHost>,
        config: DispatcherConfig,
    ) -> Self {
        let editor = CodeEditor::new(
            host.clone(),
            config.models.code_editor.clone(),
            config.max_tokens,
        );
        Self {
            files: FileOps::new(executor.config().workdir.clone()),
            executor,
            search,
            host,
            editor,
            config,
        }
    }

    /// Schemas advertised to the model
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        tool_use::tool_registry()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        self.executor.registry()
    }

    /// Execute one call; never fails, errors become `is_error` results
    pub async fn dispatch(&self, call: &ToolCall) -> DispatchOutcome {
        let span = info_span!(
            "tool_dispatch",
            tool = %call.name,
            call_id = %call.id,
            otel.name = "tool_dispatch"
        );

        async {
            let start = Instant::now();
            let mut usage = Vec::new();
            let result = match self.route(call, &mut usage).await {
                Ok(output) => ToolResult {
                    call_id: call.id.clone(),
                    is_error: output.is_error,
                    payload: output.payload,
                },
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool call failed");
                    ToolResult::error(&call.id, e.to_string())
                }
            };

            let label = metric_label(&call.name);
            let status = if result.is_error { "error" } else { "ok" };
            TOOL_CALLS.with_label_values(&[label, status]).inc();
            TOOL_CALL_DURATION
                .with_label_values(&[label])
                .observe(start.elapsed().as_secs_f64());
            info!(
                tool = %call.name,
                is_error = result.is_error,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Tool call finished"
            );

            DispatchOutcome { result, usage }
        }
        .instrument(span)
        .await
    }

    async fn route(
        &self,
        call: &ToolCall,
        usage: &mut Vec<(ModelRole, Usage)>,
    ) -> Result<Output, ToolError> {
        match call.name.as_str() {
            CREATE_FOLDERS => {
                let args: PathsArgs = parse_args(call)?;
                Ok(self.files.create_folders(&args.paths).await.into())
            }
            CREATE_FILES => {
                let args: FilesArgs = parse_args(call)?;
                Ok(self.files.create_files(&args.files).await.into())
            }
            READ_FILES => {
                let args: PathsArgs = parse_args(call)?;
                Ok(self.files.read_files(&args.paths).await.into())
            }
            RUN_SHELL_COMMAND => {
                let args: ShellArgs = parse_args(call)?;
                self.run_shell_command(&args).await
            }
            STOP_PROCESS => {
                let args: StopArgs = parse_args(call)?;
                let info = self
                    .registry()
                    .stop(&args.process_id)
                    .ok_or(ToolError::ProcessNotFound(args.process_id))?;
                Ok(Output::ok(format!(
                    "Process {} stopped: {}",
                    info.id, info.label
                )))
            }
            EXECUTE_CODE => {
                let args: CodeArgs = parse_args(call)?;
                self.execute_code(&args.code, usage).await
            }
            EDIT_AND_APPLY => {
                let args: EditArgs = parse_args(call)?;
                self.edit_and_apply(&args, usage).await
            }
            TAVILY_SEARCH => {
                let args: SearchArgs = parse_args(call)?;
                let hits = self.search.search(&args.query).await?;
                Ok(Output::ok(format_hits(&hits)))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn run_shell_command(&self, args: &ShellArgs) -> Result<Output, ToolError> {
        let sanitized = security::sanitize(&args.command);
        let parsed = security::parse(&sanitized, &self.config.whitelist)?;

        if args.background {
            let info = self.executor.spawn_background(&parsed).await?;
            let pid = info
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let log = info
                .log_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Ok(Output::ok(format!(
                "Started background process {} (pid {}): {}\nLog: {}",
                info.id, pid, info.label, log
            )));
        }

        let result = self
            .executor
            .run_command(&parsed, self.config.command_timeout)
            .await?;
        Ok(Output {
            is_error: !result.success(),
            payload: ToolPayload::text(result.render()),
        })
    }

    async fn execute_code(
        &self,
        code: &str,
        usage: &mut Vec<(ModelRole, Usage)>,
    ) -> Result<Output, ToolError> {
        let result = self.executor.execute(code, self.config.exec_timeout).await?;
        let mut text = result.render();

        if self.config.analyze_executions {
            if let Some((analysis, call_usage)) = self.analyze(code, &result).await {
                usage.push((ModelRole::CodeExecution, call_usage));
                text.push_str("\n\nAnalysis:\n");
                text.push_str(&analysis);
            }
        }

        Ok(Output {
            is_error: !result.success(),
            payload: ToolPayload::text(text),
        })
    }

    /// Secondary call under the code-execution role; failures only skip it
    async fn analyze(&self, code: &str, result: &ExecutionResult) -> Option<(String, Usage)> {
        let request = ModelRequest {
            model: self.config.models.code_execution.clone(),
            system: CODE_EXECUTION_PROMPT.to_string(),
            turns: vec![Turn::user(format!(
                "Code:\n```python\n{}\n```\n\nResult:\n{}",
                code,
                result.render()
            ))],
            tools: Vec::new(),
            max_tokens: self.config.max_tokens,
        };

        let span = info_span!("code_execution_analysis", otel.name = "code_execution_analysis");
        let start = Instant::now();
        let response = self.host.complete(request).instrument(span).await;
        observe_model_call(
            ModelRole::CodeExecution.as_str(),
            response.is_ok(),
            start.elapsed().as_secs_f64(),
        );

        match response {
            Ok(response) => Some((response.text(), response.usage)),
            Err(e) => {
                warn!(error = %e, "Execution analysis failed");
                None
            }
        }
    }

    async fn edit_and_apply(
        &self,
        args: &EditArgs,
        usage: &mut Vec<(ModelRole, Usage)>,
    ) -> Result<Output, ToolError> {
        let full = self.files.resolve(&args.path);
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| ToolError::io(&args.path, e))?;

        let proposal = self
            .editor
            .request_edits(&args.path, &content, &args.instructions)
            .await?;
        usage.push((ModelRole::CodeEditor, proposal.usage));

        let edit_error = |message: String| ToolError::Edit {
            path: args.path.clone(),
            message,
        };
        let blocks = proposal.blocks.map_err(edit_error)?;
        let updated = apply_edits(&content, &blocks).map_err(edit_error)?;

        write_file(&full, &updated)
            .await
            .map_err(|e| ToolError::io(&args.path, e))?;
        Ok(Output::ok(format!(
            "Applied {} edit(s) to {}",
            blocks.len(),
            args.path
        )))
    }
}

fn parse_args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_value(call.arguments.clone()).map_err(|e| ToolError::InvalidArguments {
        tool: call.name.clone(),
        message: e.to_string(),
    })
}

/// Bounded label set for metrics
fn metric_label(name: &str) -> &'static str {
    tool_use::TOOL_NAMES
        .iter()
        .find(|n| **n == name)
        .copied()
        .unwrap_or("unknown")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::llm::{ContentBlock, ModelHostError, ModelResponse};
    use crate::sandbox::{EnvironmentHandle, EnvironmentProvisioner, SandboxConfig};
    use crate::security::PrivilegePolicy;
    use crate::tools::search::{SearchError, SearchHit};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with canned text and records every request
    struct CannedHost {
        reply: String,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl CannedHost {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelHost for CannedHost {
        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelHostError> {
            self.requests.lock().unwrap().push(request);
            Ok(ModelResponse {
                stop_reason: Some("end_turn".to_string()),
                blocks: vec![ContentBlock::text(self.reply.clone())],
                usage: Usage {
                    input_tokens: 11,
                    output_tokens: 4,
                    cache_write_tokens: 0,
                    cache_read_tokens: 0,
                },
            })
        }
    }

    struct FixedSearch;

    #[async_trait]
    impl SearchBackend for FixedSearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
            Ok(vec![SearchHit {
                title: format!("About {}", query),
                url: "https://example.com".to_string(),
                snippet: "snippet".to_string(),
            }])
        }
    }

    fn dispatcher(dir: &std::path::Path, host: Arc<CannedHost>, analyze: bool) -> ToolDispatcher {
        let provisioner =
            EnvironmentProvisioner::with_handle(EnvironmentHandle::from_interpreter("/bin/sh"));
        let mut sandbox = SandboxConfig::new(dir);
        sandbox.privilege = PrivilegePolicy::none();
        let executor = SandboxedExecutor::new(Arc::new(provisioner), ProcessRegistry::new(), sandbox);
        let config = DispatcherConfig {
            analyze_executions: analyze,
            ..DispatcherConfig::default()
        };
        ToolDispatcher::new(Arc::new(executor), Arc::new(FixedSearch), host, config)
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), CannedHost::new(""), false);

        let outcome = d.dispatch(&call("format_disk", serde_json::json!({}))).await;
        assert!(outcome.result.is_error);
        assert_eq!(outcome.result.call_id, "call_1");
        assert!(outcome.result.payload.text.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), CannedHost::new(""), false);

        let outcome = d
            .dispatch(&call(EXECUTE_CODE, serde_json::json!({"code": 42})))
            .await;
        assert!(outcome.result.is_error);
        assert!(outcome.result.payload.text.contains("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_rejected_command_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), CannedHost::new(""), false);

        let outcome = d
            .dispatch(&call(
                RUN_SHELL_COMMAND,
                serde_json::json!({"command": "rm -rf /; ls"}),
            ))
            .await;
        assert!(outcome.result.is_error);
        assert!(outcome.result.payload.text.contains("Command not allowed"));
    }

    #[tokio::test]
    async fn test_whitelisted_command_runs() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), CannedHost::new(""), false);

        let outcome = d
            .dispatch(&call(RUN_SHELL_COMMAND, serde_json::json!({"command": "echo hi"})))
            .await;
        assert!(!outcome.result.is_error);
        assert!(outcome.result.payload.text.contains("hi"));
        assert!(outcome.result.payload.text.contains("Return Code: 0"));
    }

    #[tokio::test]
    async fn test_execute_code_with_analysis_reports_usage() {
        let dir = tempfile::tempdir().unwrap();
        let host = CannedHost::new("Looks good.");
        let d = dispatcher(dir.path(), host.clone(), true);

        let outcome = d
            .dispatch(&call(EXECUTE_CODE, serde_json::json!({"code": "echo 42"})))
            .await;
        assert!(!outcome.result.is_error);
        assert!(outcome.result.payload.text.contains("42"));
        assert!(outcome.result.payload.text.contains("Analysis:\nLooks good."));
        assert_eq!(outcome.usage.len(), 1);
        assert_eq!(outcome.usage[0].0, ModelRole::CodeExecution);
        assert_eq!(outcome.usage[0].1.input_tokens, 11);
        assert_eq!(host.requests.lock().unwrap()[0].system, CODE_EXECUTION_PROMPT);
    }

    #[tokio::test]
    async fn test_edit_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("calc.py"), "def add(a, b):\n    return a - b\n").unwrap();
        let host = CannedHost::new(
            "<<<<<<< SEARCH\n    return a - b\n=======\n    return a + b\n>>>>>>> REPLACE",
        );
        let d = dispatcher(dir.path(), host, false);

        let outcome = d
            .dispatch(&call(
                EDIT_AND_APPLY,
                serde_json::json!({"path": "calc.py", "instructions": "fix add"}),
            ))
            .await;
        assert!(!outcome.result.is_error, "{}", outcome.result.payload.text);
        assert_eq!(outcome.usage[0].0, ModelRole::CodeEditor);
        let updated = std::fs::read_to_string(dir.path().join("calc.py")).unwrap();
        assert_eq!(updated, "def add(a, b):\n    return a + b\n");
    }

    #[tokio::test]
    async fn test_edit_with_unusable_reply_still_reports_usage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.py"), "x = 1\n").unwrap();
        let d = dispatcher(dir.path(), CannedHost::new("I refuse."), false);

        let outcome = d
            .dispatch(&call(
                EDIT_AND_APPLY,
                serde_json::json!({"path": "x.py", "instructions": "change"}),
            ))
            .await;
        assert!(outcome.result.is_error);
        assert_eq!(outcome.usage.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("x.py")).unwrap(), "x = 1\n");
    }

    #[tokio::test]
    async fn test_search_and_stop_process() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), CannedHost::new(""), false);

        let outcome = d
            .dispatch(&call(TAVILY_SEARCH, serde_json::json!({"query": "rust"})))
            .await;
        assert!(outcome.result.payload.text.contains("About rust"));

        let outcome = d
            .dispatch(&call(STOP_PROCESS, serde_json::json!({"process_id": "nope"})))
            .await;
        assert!(outcome.result.is_error);
        assert!(outcome.result.payload.text.contains("nope"));
    }

    #[tokio::test]
    async fn test_create_and_read_round() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), CannedHost::new(""), false);

        let outcome = d
            .dispatch(&call(
                CREATE_FILES,
                serde_json::json!({"files": [{"path": "pkg/a.txt", "content": "alpha"}]}),
            ))
            .await;
        assert!(!outcome.result.is_error);

        let outcome = d
            .dispatch(&call(READ_FILES, serde_json::json!({"paths": ["pkg/a.txt"]})))
            .await;
        assert!(outcome.result.payload.text.contains("alpha"));
    }
}
