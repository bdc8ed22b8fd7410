//! engineer CLI - line-oriented front-end over `Session`

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use engineer::agent::{AgentConfig, AgentError, Session, SessionEvent};
use engineer::config::EngineConfig;
use engineer::llm::{AnthropicHost, ContentBlock, ModelHost, RoleModels, TurnRole};
use engineer::sandbox::{EnvironmentProvisioner, ProcessRegistry, SandboxConfig, SandboxedExecutor};
use engineer::tools::{
    DispatcherConfig, SearchBackend, TavilySearch, ToolDispatcher, UnconfiguredSearch,
};
use engineer::voice::VoiceCommand;

/// Longest tool result echoed to the terminal
const RESULT_PREVIEW_CHARS: usize = 400;

#[derive(Parser)]
#[command(name = "engineer")]
#[command(about = "Tool-using coding assistant with sandboxed code execution")]
#[command(version)]
struct Cli {
    /// Model id for every role (overrides ENGINEER_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Default automode iteration cap
    #[arg(long, default_value = "25")]
    automode_iterations: usize,

    /// Project directory tools operate in
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// OTLP collector endpoint (overrides ENGINEER_OTLP_ENDPOINT)
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Skip model analysis of code execution output
    #[arg(long)]
    no_analysis: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env()?;
    if let Some(model) = &cli.model {
        config.models = RoleModels::uniform(model.clone());
    }
    if cli.otlp_endpoint.is_some() {
        config.otlp_endpoint = cli.otlp_endpoint.clone();
    }

    engineer::tracing::init_tracing("engineer", config.otlp_endpoint.as_deref())?;

    let workdir = std::fs::canonicalize(&cli.workdir)?;
    let host: Arc<dyn ModelHost> = Arc::new(AnthropicHost::new(
        config.anthropic_api_key.clone(),
        config.anthropic_base_url.clone(),
        config.request_timeout,
    )?);
    let search: Arc<dyn SearchBackend> = match &config.tavily_api_key {
        Some(key) => Arc::new(TavilySearch::new(key.clone())?),
        None => Arc::new(UnconfiguredSearch),
    };

    let venv_root = if config.venv_path.is_absolute() {
        config.venv_path.clone()
    } else {
        workdir.join(&config.venv_path)
    };
    let provisioner = Arc::new(EnvironmentProvisioner::new(venv_root, config.base_python.clone()));
    let registry = ProcessRegistry::new();
    let executor = Arc::new(SandboxedExecutor::new(
        provisioner,
        registry.clone(),
        SandboxConfig::new(&workdir),
    ));

    let dispatcher = ToolDispatcher::new(
        executor,
        search,
        host.clone(),
        DispatcherConfig {
            exec_timeout: config.exec_timeout,
            analyze_executions: !cli.no_analysis,
            models: config.models.clone(),
            ..DispatcherConfig::default()
        },
    );

    let agent_config = AgentConfig {
        models: config.models.clone(),
        max_context_tokens: config.max_context_tokens,
        automode_max_iterations: cli.automode_iterations,
        ..AgentConfig::default()
    };
    let mut session = Session::new(host, dispatcher, agent_config);
    let printer = tokio::spawn(print_events(session.subscribe()));

    println!("engineer {} (workdir: {})", env!("CARGO_PKG_VERSION"), workdir.display());
    println!("Commands: exit | reset (or \"reset conversation\") | save chat | tokens | metrics | processes | automode [N] <goal> | image <path> <text> | voice");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        // Spoken command phrases work when typed as well
        match VoiceCommand::parse(input) {
            Some(VoiceCommand::ResetConversation) => {
                session.reset();
                println!("[INFO] Conversation reset.");
                continue;
            }
            Some(VoiceCommand::SaveChat) => {
                match session.export(&workdir) {
                    Ok(path) => println!("[INFO] Chat saved to {}", path.display()),
                    Err(e) => println!("[ERROR] {}", e),
                }
                continue;
            }
            Some(VoiceCommand::ExitVoiceMode) => {
                println!("[INFO] Voice mode is not active.");
                continue;
            }
            None => {}
        }

        match input {
            "exit" => break,
            "reset" => {
                session.reset();
                println!("[INFO] Conversation reset.");
            }
            "tokens" => println!("{}", session.token_report()),
            "metrics" => print!("{}", engineer::metrics::render()),
            "processes" => {
                let processes = registry.list();
                if processes.is_empty() {
                    println!("[INFO] No running processes.");
                }
                for p in processes {
                    println!("{}  pid={:?}  {:?}  {}", p.id, p.pid, p.kind, p.label);
                }
            }
            "voice" => println!("[INFO] No speech-to-text backend is configured in this build."),
            _ if input.starts_with("automode") => {
                let (max, goal) = parse_automode(input, session.config().automode_max_iterations);
                if goal.is_empty() {
                    println!("[ERROR] Usage: automode [N] <goal>");
                    continue;
                }
                run_automode(&mut session, &goal, max).await;
            }
            _ if input.starts_with("image ") => {
                let mut parts = input["image ".len()..].trim().splitn(2, ' ');
                let path = PathBuf::from(parts.next().unwrap_or_default());
                let text = parts.next().unwrap_or("Describe this image.").to_string();
                report(session.submit_with_image(&text, &path).await);
            }
            _ => report(session.submit(input).await),
        }
    }

    let stopped = registry.shutdown();
    if stopped > 0 {
        println!("[INFO] Stopped {} background process(es).", stopped);
    }
    drop(session);
    let _ = printer.await;
    let _ = tokio::io::stdout().flush().await;
    engineer::tracing::shutdown_tracing();
    Ok(())
}

/// `automode 5 build a CLI` → (5, "build a CLI"); the count is optional
fn parse_automode(input: &str, default_max: usize) -> (usize, String) {
    let rest = input["automode".len()..].trim();
    let mut parts = rest.splitn(2, ' ');
    match parts.next().map(str::parse::<usize>) {
        Some(Ok(n)) => (n, parts.next().unwrap_or("").trim().to_string()),
        _ => (default_max, rest.to_string()),
    }
}

async fn run_automode(session: &mut Session, goal: &str, max_iterations: usize) {
    let stop = session.stop_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n[INFO] Stopping automode after the current round...");
            stop.store(true, Ordering::SeqCst);
        }
    });

    match session.run_automode(goal, max_iterations).await {
        Ok(result) => println!(
            "[AUTOMODE] Finished after {} iteration(s): {}",
            result.iterations,
            result.outcome.as_str()
        ),
        Err(e) => println!("[ERROR] {}", e),
    }
    watcher.abort();
}

fn report(result: Result<engineer::agent::AgentResult, AgentError>) {
    if let Err(e) = result {
        println!("[ERROR] {}", e);
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::TurnAppended(turn) => match turn.role {
                TurnRole::User => {}
                TurnRole::Assistant => {
                    for block in &turn.blocks {
                        match block {
                            ContentBlock::Text { text } => println!("\nAssistant: {}", text),
                            ContentBlock::ToolUse { call } => {
                                println!("[TOOL] {} {}", call.name, call.arguments)
                            }
                            _ => {}
                        }
                    }
                }
                TurnRole::Tool => {
                    for block in &turn.blocks {
                        if let ContentBlock::ToolResult { result } = block {
                            let status = if result.is_error { "error" } else { "ok" };
                            println!("[RESULT:{}] {}", status, preview(&result.payload.text));
                        }
                    }
                }
            },
            SessionEvent::Error(message) => println!("[ERROR] {}", message),
            SessionEvent::AutomodeStarted {
                goal,
                max_iterations,
            } => println!("[AUTOMODE] Started (max {} iterations): {}", max_iterations, goal),
            SessionEvent::AutomodeFinished { .. } => {}
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= RESULT_PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
    format!("{}…", cut)
}
