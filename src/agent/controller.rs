//! Session - orchestration loop for one operator and one hosted model
//!
//! The Session owns the conversation state and is its only writer. It sends
//! the transcript to the model host, dispatches any tool calls the model
//! makes, appends every result, and repeats until the model answers in plain
//! text. Automode repeats whole turns until the completion sentinel appears
//! or the iteration cap is reached.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm::tool_use::{
    AUTOMODE_SYSTEM_PROMPT, COMPLETION_SENTINEL, CONTINUATION_PROMPT, DEFAULT_SYSTEM_PROMPT,
};
use crate::llm::{
    ContentBlock, ModelHost, ModelHostError, ModelRequest, ModelResponse, ModelRole, RoleModels,
    Turn,
};
use crate::metrics::{observe_model_call, AGENT_TURNS, AUTOMODE_ROUNDS, AUTOMODE_RUNS};
use crate::session::{
    export_transcript, ConversationState, ExportError, TokenReport, DEFAULT_MAX_CONTEXT_TOKENS,
};
use crate::tools::image::load_image;
use crate::tools::{ToolDispatcher, ToolError};
use crate::voice::{speak_in_background, TextToSpeech};

/// Configuration for the orchestration loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model id per role
    pub models: RoleModels,
    /// Output cap for main and tool-checker calls
    pub max_tokens: u32,
    /// Estimated transcript size above which the oldest turns are dropped
    pub max_context_tokens: usize,
    /// Maximum model calls within one turn before giving up
    pub max_tool_rounds: usize,
    /// Default automode iteration cap
    pub automode_max_iterations: usize,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            models: RoleModels::default(),
            max_tokens: 8000,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            max_tool_rounds: 25,
            automode_max_iterations: 25,
            system_prompt: None,
        }
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingModel,
    Responding,
    DispatchingTool,
}

/// How an automode run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomodeOutcome {
    /// The model emitted the completion sentinel
    Completed,
    /// The iteration cap was reached first
    MaxIterations,
    /// The stop flag was raised between rounds
    Stopped,
}

impl AutomodeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomodeOutcome::Completed => "completed",
            AutomodeOutcome::MaxIterations => "max_iterations",
            AutomodeOutcome::Stopped => "stopped",
        }
    }
}

/// Display events for front-ends
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TurnAppended(Turn),
    /// A model-host failure; the matching "Error: ..." turn is also appended
    Error(String),
    AutomodeStarted {
        goal: String,
        max_iterations: usize,
    },
    AutomodeFinished {
        iterations: usize,
        outcome: Option<AutomodeOutcome>,
    },
}

/// Result of one turn
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Final text reply from the model
    pub final_response: String,
    /// Number of model calls made
    pub rounds: usize,
    /// Number of tool calls dispatched
    pub tool_calls_made: usize,
    /// Unique trace ID for this turn
    pub trace_id: String,
}

/// Result of an automode run
#[derive(Debug, Clone)]
pub struct AutomodeResult {
    pub outcome: AutomodeOutcome,
    /// Automode rounds executed
    pub iterations: usize,
    /// Text of the last round's reply
    pub final_response: String,
    pub trace_id: String,
}

/// Error type for agent operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The model host failed; the round was aborted
    #[error("Model host error: {0}")]
    Model(#[from] ModelHostError),

    /// A single turn used its whole round budget without a text reply
    #[error("Maximum tool rounds ({0}) reached without a final reply")]
    MaxRoundsReached(usize),

    /// The attached image could not be loaded; nothing was sent
    #[error("Could not attach image: {0}")]
    Image(#[source] ToolError),
}

/// One conversation with the model, driven by a single front-end
pub struct Session {
    host: Arc<dyn ModelHost>,
    dispatcher: ToolDispatcher,
    config: AgentConfig,
    state: ConversationState,
    loop_state: LoopState,
    automode: bool,
    stop: Arc<AtomicBool>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    tts: Option<Arc<dyn TextToSpeech>>,
}

impl Session {
    /// Create a new session
    ///
    /// # Arguments
    /// * `host` - Model host for the main and tool-checker roles
    /// * `dispatcher` - Tool dispatcher (owns the sandbox and the process registry)
    /// * `config` - Loop configuration
    pub fn new(host: Arc<dyn ModelHost>, dispatcher: ToolDispatcher, config: AgentConfig) -> Self {
        Self {
            host,
            dispatcher,
            config,
            state: ConversationState::new(),
            loop_state: LoopState::Idle,
            automode: false,
            stop: Arc::new(AtomicBool::new(false)),
            events: None,
            tts: None,
        }
    }

    /// Receive a `SessionEvent` for every appended turn and error
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Speak each final reply of `submit`
    pub fn with_tts(mut self, tts: Arc<dyn TextToSpeech>) -> Self {
        self.tts = Some(tts);
        self
    }

    /// Raising this flag ends automode before its next round
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn is_automode(&self) -> bool {
        self.automode
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Run one human turn
    pub async fn submit(&mut self, text: &str) -> Result<AgentResult, AgentError> {
        let system = self.system_prompt().to_string();
        let result = self.run_turn(Turn::user(text), &system).await?;
        self.speak(&result.final_response);
        Ok(result)
    }

    /// Run one human turn with an image attached before the text
    pub async fn submit_with_image(
        &mut self,
        text: &str,
        image_path: &Path,
    ) -> Result<AgentResult, AgentError> {
        let image = load_image(image_path).await.map_err(AgentError::Image)?;
        let system = self.system_prompt().to_string();
        let result = self
            .run_turn(Turn::user_with_image(text, image), &system)
            .await?;
        self.speak(&result.final_response);
        Ok(result)
    }

    /// Work toward `goal` autonomously for at most `max_iterations` rounds
    ///
    /// Each round is a full turn. The first round sends the goal, later rounds
    /// send the continuation prompt. A model-host error ends the run and
    /// clears the automode flag.
    pub async fn run_automode(
        &mut self,
        goal: &str,
        max_iterations: usize,
    ) -> Result<AutomodeResult, AgentError> {
        let max_iterations = max_iterations.max(1);
        let trace_id = Uuid::now_v7().to_string();

        let span = info_span!(
            "automode",
            trace_id = %trace_id,
            max_iterations,
            otel.name = "automode"
        );

        self.automode = true;
        self.stop.store(false, Ordering::SeqCst);
        self.emit(SessionEvent::AutomodeStarted {
            goal: goal.to_string(),
            max_iterations,
        });
        info!(trace_id = %trace_id, max_iterations, "Entering automode");

        let run = async {
            let mut input = goal.to_string();
            let mut iterations = 0;
            let mut final_response = String::new();

            let outcome = loop {
                if iterations >= max_iterations {
                    break AutomodeOutcome::MaxIterations;
                }
                if self.stop.load(Ordering::SeqCst) {
                    break AutomodeOutcome::Stopped;
                }
                iterations += 1;

                let system = self.automode_prompt(iterations, max_iterations);
                let result = match self.run_turn(Turn::user(input), &system).await {
                    Ok(result) => result,
                    Err(e) => return (Err(e), iterations),
                };
                debug!(iteration = iterations, rounds = result.rounds, "Automode round finished");

                let done = result.final_response.contains(COMPLETION_SENTINEL);
                final_response = result.final_response;
                if done {
                    break AutomodeOutcome::Completed;
                }
                input = CONTINUATION_PROMPT.to_string();
            };

            (Ok::<_, AgentError>((outcome, final_response)), iterations)
        }
        .instrument(span)
        .await;

        self.automode = false;
        let (run, iterations) = run;
        match run {
            Ok((outcome, final_response)) => {
                AUTOMODE_RUNS.with_label_values(&[outcome.as_str()]).inc();
                AUTOMODE_ROUNDS.observe(iterations as f64);
                info!(trace_id = %trace_id, iterations, outcome = outcome.as_str(), "Exiting automode");
                self.emit(SessionEvent::AutomodeFinished {
                    iterations,
                    outcome: Some(outcome),
                });
                Ok(AutomodeResult {
                    outcome,
                    iterations,
                    final_response,
                    trace_id,
                })
            }
            Err(e) => {
                AUTOMODE_RUNS.with_label_values(&["error"]).inc();
                AUTOMODE_ROUNDS.observe(iterations as f64);
                warn!(trace_id = %trace_id, iterations, error = %e, "Automode aborted");
                self.emit(SessionEvent::AutomodeFinished {
                    iterations,
                    outcome: None,
                });
                Err(e)
            }
        }
    }

    /// Clear the transcript and every token counter
    pub fn reset(&mut self) {
        self.state.reset();
        self.loop_state = LoopState::Idle;
        info!("Conversation reset");
    }

    /// Write the transcript as markdown under `dir`
    pub fn export(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        export_transcript(self.state.turns(), dir)
    }

    pub fn token_report(&self) -> TokenReport {
        self.state.tokens().report()
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    fn automode_prompt(&self, iteration: usize, max_iterations: usize) -> String {
        format!(
            "{}\n\n{}\nYou are on iteration {} of {}.",
            self.system_prompt(),
            AUTOMODE_SYSTEM_PROMPT,
            iteration,
            max_iterations
        )
    }

    /// Drive one turn from the user input to a plain-text reply
    async fn run_turn(&mut self, input: Turn, system: &str) -> Result<AgentResult, AgentError> {
        let trace_id = Uuid::now_v7().to_string();

        let span = info_span!(
            "agent_turn",
            trace_id = %trace_id,
            automode = self.automode,
            otel.name = "agent_turn"
        );

        async {
            self.append(input);

            let mut role = ModelRole::Main;
            let mut tool_calls_made = 0;

            for round in 1..=self.config.max_tool_rounds {
                let dropped = self.state.enforce_budget(self.config.max_context_tokens);
                if dropped > 0 {
                    info!(trace_id = %trace_id, dropped, "Dropped oldest turns to fit the context budget");
                }

                self.loop_state = LoopState::AwaitingModel;
                let response = match self.call_model(role, system, &trace_id).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(trace_id = %trace_id, role = %role, error = %e, "Model call failed");
                        self.append(Turn::assistant(format!("Error: {}", e)));
                        self.emit(SessionEvent::Error(e.to_string()));
                        self.loop_state = LoopState::Idle;
                        AGENT_TURNS.with_label_values(&["error"]).inc();
                        return Err(AgentError::Model(e));
                    }
                };
                self.state.record_usage(role, &response.usage);

                let calls = response.tool_calls();
                let text = response.text();
                let blocks = if response.blocks.is_empty() {
                    vec![ContentBlock::text("(no content)")]
                } else {
                    response.blocks
                };
                self.append(Turn::assistant_blocks(blocks));

                if calls.is_empty() {
                    self.loop_state = LoopState::Responding;
                    info!(trace_id = %trace_id, rounds = round, tool_calls = tool_calls_made, "Turn completed");
                    AGENT_TURNS.with_label_values(&["ok"]).inc();
                    self.loop_state = LoopState::Idle;
                    return Ok(AgentResult {
                        final_response: text,
                        rounds: round,
                        tool_calls_made,
                        trace_id: trace_id.clone(),
                    });
                }

                // Every call gets its result before the model is asked again
                self.loop_state = LoopState::DispatchingTool;
                for call in &calls {
                    let outcome = self.dispatcher.dispatch(call).await;
                    for (secondary_role, usage) in &outcome.usage {
                        self.state.record_usage(*secondary_role, usage);
                    }
                    self.append(Turn::tool_result(outcome.result));
                    tool_calls_made += 1;
                }

                role = ModelRole::ToolChecker;
            }

            warn!(trace_id = %trace_id, max = self.config.max_tool_rounds, "Max tool rounds reached");
            AGENT_TURNS.with_label_values(&["max_rounds"]).inc();
            self.loop_state = LoopState::Idle;
            Err(AgentError::MaxRoundsReached(self.config.max_tool_rounds))
        }
        .instrument(span)
        .await
    }

    async fn call_model(
        &self,
        role: ModelRole,
        system: &str,
        trace_id: &str,
    ) -> Result<ModelResponse, ModelHostError> {
        let model = self.config.models.for_role(role).to_string();
        let span = info_span!(
            "model_call",
            trace_id = %trace_id,
            role = %role,
            model = %model,
            otel.name = "model_call"
        );

        let request = ModelRequest {
            model,
            system: system.to_string(),
            turns: self.state.snapshot(),
            tools: self.dispatcher.tool_schemas(),
            max_tokens: self.config.max_tokens,
        };

        let start = Instant::now();
        let result = self.host.complete(request).instrument(span).await;
        let elapsed = start.elapsed().as_secs_f64();
        observe_model_call(role.as_str(), result.is_ok(), elapsed);

        if let Ok(response) = &result {
            debug!(
                trace_id = %trace_id,
                role = %role,
                stop_reason = ?response.stop_reason,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                duration_ms = elapsed * 1000.0,
                "Model call completed"
            );
        }
        result
    }

    fn append(&mut self, turn: Turn) {
        if let Some(events) = &self.events {
            let _ = events.send(SessionEvent::TurnAppended(turn.clone()));
        }
        self.state.add_turn(turn);
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn speak(&self, text: &str) {
        if let Some(tts) = &self.tts {
            if !text.trim().is_empty() {
                speak_in_background(tts.clone(), text.to_string());
            }
        }
    }
}
