//! # Agent Loop
//!
//! The state machine that drives propose / approve / execute / observe
//! cycles. Each iteration asks the generation backend for a response,
//! parses actions out of it, gates them through the approval policy,
//! dispatches them to the workspace store or the sandbox executor, and
//! feeds the results back into the conversation.

use anyhow::{Result, anyhow};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::application::parsing::parse_actions;
use crate::domain::config::{AgentMode, AppConfig};
use crate::domain::traits::{ApprovalHook, IterationHook, TextGenerator};
use crate::domain::types::{
    Action, ActionKind, ActionResult, ConversationMessage, ExecMode, ExecutionResult,
    IterationRecord, Role, RunState, RunSummary,
};
use crate::infrastructure::executor::SandboxExecutor;
use crate::infrastructure::store::WorkspaceStore;
use crate::strings::prompts;

/// Fixed completion-signaling substrings, matched case-insensitively.
const DONE_PHRASES: &[&str] = &[
    "all tasks complete",
    "tasks completed",
    "implementation complete",
    "finished all tasks",
    "project complete",
    "completed all requested tasks",
    "implementation is now complete",
    "work is complete",
];

/// Cancellation handle for a running loop. Takes effect at the next
/// iteration boundary; in-flight generation or dispatch is never
/// interrupted.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        tracing::info!("Stop requested");
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Serialize)]
struct ActionOutcome<'a> {
    action: &'a Action,
    result: &'a ActionResult,
}

pub struct AgentLoop {
    config: AppConfig,
    generator: Arc<dyn TextGenerator>,
    store: WorkspaceStore,
    executor: SandboxExecutor,
    conversation: Vec<ConversationMessage>,
    context_docs: Vec<(String, String)>,
    iteration: u32,
    state: RunState,
    cancel: Arc<AtomicBool>,
    on_action: Option<ApprovalHook>,
    on_iteration_complete: Option<IterationHook>,
}

impl AgentLoop {
    pub fn new(
        config: AppConfig,
        generator: Arc<dyn TextGenerator>,
        store: WorkspaceStore,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            config,
            generator,
            store,
            executor,
            conversation: Vec::new(),
            context_docs: Vec::new(),
            iteration: 0,
            state: RunState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
            on_action: None,
            on_iteration_complete: None,
        }
    }

    /// Decision hook consulted per action in approval mode.
    pub fn with_on_action(mut self, hook: ApprovalHook) -> Self {
        self.on_action = Some(hook);
        self
    }

    /// Observation hook fired after every completed iteration.
    pub fn with_on_iteration_complete(mut self, hook: IterationHook) -> Self {
        self.on_iteration_complete = Some(hook);
        self
    }

    pub fn add_context_doc(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.context_docs.push((name.into(), content.into()));
    }

    pub fn set_context_docs(&mut self, docs: Vec<(String, String)>) {
        self.context_docs = docs;
    }

    pub fn clear_context_docs(&mut self) {
        self.context_docs.clear();
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn conversation(&self) -> &[ConversationMessage] {
        &self.conversation
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.cancel.clone())
    }

    /// Run the loop until a completion phrase, iteration exhaustion, a stop
    /// request, or a generation failure.
    pub async fn run(&mut self, initial_prompt: &str) -> Result<RunSummary> {
        let max_iterations = self.config.agent.max_iterations;
        self.iteration = 0;
        self.state = RunState::Running;
        self.cancel.store(false, Ordering::SeqCst);
        let start = Instant::now();

        self.conversation = vec![
            ConversationMessage::new(Role::System, prompts::system_prompt(&self.context_docs)),
            ConversationMessage::new(Role::User, initial_prompt),
        ];

        while self.iteration < max_iterations {
            // Cancellation is only honored here, at the iteration boundary.
            if self.cancel.load(Ordering::SeqCst) {
                self.state = RunState::Stopped;
                tracing::info!("Agent execution stopped");
                break;
            }
            self.iteration += 1;
            tracing::info!("Iteration {}/{}", self.iteration, max_iterations);

            let prompt = prompts::format_conversation(&self.conversation);
            let response = match self
                .generator
                .generate(
                    &prompt,
                    self.config.model.temperature,
                    self.config.model.max_tokens,
                    self.config.model.top_p,
                )
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    self.state = RunState::Failed;
                    return Err(anyhow!("Generation failed: {e}"));
                }
            };

            let actions = parse_actions(&response);

            if actions.is_empty() {
                // No actions: the response is thinking. Still consumes a slot.
                tracing::info!("No actions found in response, treating as thinking");
                self.conversation
                    .push(ConversationMessage::new(Role::Assistant, response.clone()));
                self.notify_iteration(Vec::new(), &response);
                if check_if_done(&response) {
                    self.state = RunState::Completed;
                    break;
                }
                continue;
            }

            let mut outcomes: Vec<(Action, ActionResult)> = Vec::new();
            for action in actions {
                let approved = match self.config.agent.mode {
                    AgentMode::Autonomous => true,
                    // Without a decision hook nothing is dispatched.
                    AgentMode::Approval => {
                        self.on_action.as_ref().is_some_and(|hook| hook(&action))
                    }
                };

                let result = if approved {
                    self.dispatch(&action).await
                } else {
                    tracing::info!("Action rejected: {}", action.kind.as_str());
                    ActionResult::rejected()
                };
                outcomes.push((action, result));
            }

            let wire: Vec<ActionOutcome> = outcomes
                .iter()
                .map(|(action, result)| ActionOutcome { action, result })
                .collect();
            let serialized =
                serde_json::to_string_pretty(&wire).unwrap_or_else(|_| "[]".to_string());

            self.conversation
                .push(ConversationMessage::new(Role::Assistant, response.clone()));
            self.conversation.push(ConversationMessage::new(
                Role::User,
                prompts::action_results_turn(&serialized),
            ));

            self.notify_iteration(outcomes, &response);

            if check_if_done(&response) {
                tracing::info!("Agent completed all tasks");
                self.state = RunState::Completed;
                break;
            }
        }

        if self.state == RunState::Running {
            // Exhausted the iteration budget without an explicit phrase.
            self.state = RunState::Completed;
        }
        self.summary(start)
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    fn notify_iteration(&self, actions: Vec<(Action, ActionResult)>, raw_response: &str) {
        if let Some(hook) = &self.on_iteration_complete {
            hook(&IterationRecord {
                index: self.iteration,
                actions,
                raw_response: raw_response.to_string(),
            });
        }
    }

    /// Dispatch one approved action to its handler. Handler failures are
    /// converted to error results here; nothing below this boundary can
    /// abort the iteration or the run.
    async fn dispatch(&self, action: &Action) -> ActionResult {
        let start = Instant::now();
        let mut result = match &action.kind {
            ActionKind::ReadFile => {
                let filepath = action.param_str("filepath").unwrap_or("");
                match self.store.read(filepath).await {
                    Ok(content) => ActionResult::success(content),
                    Err(e) => ActionResult::error(e.to_string()),
                }
            }
            ActionKind::WriteFile => {
                let filepath = action.param_str("filepath").unwrap_or("");
                let content = action.param_str("content").unwrap_or("");
                match self.store.write(filepath, content).await {
                    Ok(()) => ActionResult::success(format!("File written: {filepath}")),
                    Err(e) => ActionResult::error(e.to_string()),
                }
            }
            ActionKind::ListFiles => {
                let path = action.param_str("path").unwrap_or("");
                match self.store.list(path) {
                    Ok(entries) => ActionResult::success(
                        serde_json::to_string_pretty(&entries)
                            .unwrap_or_else(|_| "[]".to_string()),
                    ),
                    Err(e) => ActionResult::error(e.to_string()),
                }
            }
            ActionKind::CreateDirectory => {
                let path = action.param_str("path").unwrap_or("");
                match self.store.create_dir(path).await {
                    Ok(()) => ActionResult::success(format!("Directory created: {path}")),
                    Err(e) => ActionResult::error(e.to_string()),
                }
            }
            ActionKind::DeleteFile => {
                let filepath = action.param_str("filepath").unwrap_or("");
                match self.store.delete(filepath).await {
                    Ok(()) => ActionResult::success(format!("Deleted: {filepath}")),
                    Err(e) => ActionResult::error(e.to_string()),
                }
            }
            ActionKind::RunCode => {
                let code = action.param_str("code").unwrap_or("");
                let mode = ExecMode::from_wire(action.param_str("mode").unwrap_or("exec"));
                from_execution(self.executor.execute_code(code, mode).await)
            }
            ActionKind::RunCommand => {
                let command = action.param_str("command").unwrap_or("");
                from_execution(self.executor.run_command(command).await)
            }
            ActionKind::RunTest => {
                let test_path = action.param_str("test_path").unwrap_or("");
                from_execution(self.executor.run_test(test_path).await)
            }
            ActionKind::ReadLogs => {
                let log_path = action.param_str("log_path").unwrap_or("");
                let num_lines = action.param_u64("num_lines").unwrap_or(100) as usize;
                ActionResult::success(self.executor.read_logs(log_path, num_lines).await)
            }
            ActionKind::Other(kind) => ActionResult::error(format!("Unknown action type: {kind}")),
        };

        if result.execution_time == 0.0 {
            result.execution_time = start.elapsed().as_secs_f64();
        }
        result
    }

    fn summary(&self, start: Instant) -> Result<RunSummary> {
        let files = self.store.list("")?;
        let mut file_types: HashMap<String, usize> = HashMap::new();
        for file in files.iter().filter(|f| !f.is_dir) {
            *file_types.entry(file.extension.clone()).or_insert(0) += 1;
        }
        Ok(RunSummary {
            iterations: self.iteration,
            total_files: files.iter().filter(|f| !f.is_dir).count(),
            file_types,
            elapsed_time: start.elapsed().as_secs_f64(),
            timestamp: chrono::Local::now().to_rfc3339(),
            workspace: self.store.root().to_string_lossy().to_string(),
            files,
        })
    }
}

/// Map a sandboxed execution outcome onto the action-result shape.
fn from_execution(exec: ExecutionResult) -> ActionResult {
    ActionResult {
        status: if exec.success {
            crate::domain::types::ActionStatus::Success
        } else {
            crate::domain::types::ActionStatus::Error
        },
        output: Some(exec.output),
        error: if exec.error.is_empty() {
            None
        } else {
            Some(exec.error)
        },
        return_value: exec.return_value,
        execution_time: exec.execution_time,
    }
}

fn check_if_done(response: &str) -> bool {
    let lower = response.to_lowercase();
    DONE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
