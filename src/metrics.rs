//! Prometheus metrics for the assistant
//!
//! All metrics live in the default registry. `render()` produces the text
//! exposition format, shown by the CLI's `metrics` command.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Model Host Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Model calls by role and outcome.
    ///
    /// Labels:
    /// - role: main, tool_checker, code_editor, code_execution
    /// - status: ok, error
    pub static ref MODEL_CALLS: IntCounterVec = register_int_counter_vec!(
        "engineer_model_calls_total",
        "Model host calls by role and status",
        &["role", "status"]
    ).expect("failed to register MODEL_CALLS metric");

    /// Model call latency in seconds, by role.
    pub static ref MODEL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "engineer_model_call_duration_seconds",
        "Model host call latency",
        &["role"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0]
    ).expect("failed to register MODEL_CALL_DURATION metric");

    /// Tokens charged per role and kind.
    ///
    /// Labels:
    /// - role: the model role the call was attributed to
    /// - kind: input, output, cache_write, cache_read
    pub static ref TOKENS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "engineer_tokens_total",
        "Tokens reported by the model host",
        &["role", "kind"]
    ).expect("failed to register TOKENS_TOTAL metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool dispatches by tool name and outcome.
    ///
    /// Labels:
    /// - tool: registered tool name, or "unknown"
    /// - status: ok, error
    pub static ref TOOL_CALLS: IntCounterVec = register_int_counter_vec!(
        "engineer_tool_calls_total",
        "Tool dispatches by tool and status",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    /// Tool dispatch latency in seconds.
    pub static ref TOOL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "engineer_tool_call_duration_seconds",
        "Tool dispatch latency",
        &["tool"]
    ).expect("failed to register TOOL_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sandboxed process runs by outcome.
    ///
    /// Labels:
    /// - status: success, error, timeout
    pub static ref CODE_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "engineer_code_executions_total",
        "Sandboxed executions by status",
        &["status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    /// Sandboxed execution wall time in seconds.
    pub static ref CODE_EXECUTION_DURATION: Histogram = register_histogram!(
        "engineer_code_execution_duration_seconds",
        "Sandboxed execution wall time",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("failed to register CODE_EXECUTION_DURATION metric");

    /// Processes currently tracked by the process registry.
    pub static ref RUNNING_PROCESSES: IntGauge = register_int_gauge!(
        "engineer_running_processes",
        "Background and in-flight processes in the registry"
    ).expect("failed to register RUNNING_PROCESSES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Orchestration Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Completed human turns by outcome (ok, error, max_rounds).
    pub static ref AGENT_TURNS: IntCounterVec = register_int_counter_vec!(
        "engineer_agent_turns_total",
        "Orchestration turns by outcome",
        &["outcome"]
    ).expect("failed to register AGENT_TURNS metric");

    /// Automode runs by how they ended (completed, max_iterations, stopped, error).
    pub static ref AUTOMODE_RUNS: IntCounterVec = register_int_counter_vec!(
        "engineer_automode_runs_total",
        "Automode runs by outcome",
        &["outcome"]
    ).expect("failed to register AUTOMODE_RUNS metric");

    /// Rounds used per automode run.
    pub static ref AUTOMODE_ROUNDS: Histogram = register_histogram!(
        "engineer_automode_rounds",
        "Rounds per automode run",
        vec![1.0, 2.0, 3.0, 5.0, 10.0, 15.0, 25.0, 50.0]
    ).expect("failed to register AUTOMODE_ROUNDS metric");
}

/// Record one model call's outcome and latency
pub fn observe_model_call(role: &str, ok: bool, duration_secs: f64) {
    let status = if ok { "ok" } else { "error" };
    MODEL_CALLS.with_label_values(&[role, status]).inc();
    MODEL_CALL_DURATION
        .with_label_values(&[role])
        .observe(duration_secs);
}

/// Encode every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_touched_metrics() {
        TOOL_CALLS.with_label_values(&["read_files", "ok"]).inc();
        RUNNING_PROCESSES.set(0);
        let text = render();
        assert!(text.contains("engineer_tool_calls_total"));
        assert!(text.contains("engineer_running_processes"));
    }
}
