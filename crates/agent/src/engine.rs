//! Runs one turn as a state machine.
//!
//! ```text
//! Idle ─► Planning ─┬─► ToolExecuting ─► Planning ...
//!                   └─► Responding ─► Done
//!        any state ─► Error | Cancelled
//! ```
//!
//! The engine works on a history it has exclusive access to and reports
//! progress through a [`TurnObserver`]. It never emits the terminal event
//! itself: it returns a [`TurnOutcome`] and the caller publishes
//! [`TurnOutcome::terminal_event`] once the session is released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use taskrag_config::EngineConfig;
use taskrag_core::error::{GenerationError, ToolError, TurnError};
use taskrag_core::event::StreamEvent;
use taskrag_core::message::{OpenTurn, Role, ToolCallRecord, ToolOutcome, Turn};
use taskrag_core::provider::{TokenStream, ToolIntent};
use taskrag_core::session::TurnState;
use taskrag_core::tool::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::planner::{Plan, TurnPlanner};

/// Receives the events and state changes of a running turn.
pub trait TurnObserver: Send + Sync {
    fn emit(&self, event: StreamEvent);

    fn transition(&self, state: TurnState);
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed,
    Failed(TurnError),
    Cancelled,
}

impl TurnOutcome {
    pub fn state(&self) -> TurnState {
        match self {
            Self::Completed => TurnState::Done,
            Self::Failed(_) => TurnState::Error,
            Self::Cancelled => TurnState::Cancelled,
        }
    }

    /// The single terminal event for this turn.
    pub fn terminal_event(&self) -> StreamEvent {
        match self {
            Self::Completed => StreamEvent::TurnComplete,
            Self::Failed(e) => StreamEvent::error(e.kind(), e.to_string()),
            Self::Cancelled => StreamEvent::Cancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Planning→ToolExecuting cycles allowed per turn.
    pub max_tool_iterations: usize,
    /// Bound on obtaining a plan and on each gap between streamed fragments.
    pub generation_timeout: Duration,
    /// Pause before the single retry of a transient tool failure.
    pub retry_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_tool_iterations: config.max_tool_iterations,
            generation_timeout: config.generation_timeout(),
            retry_backoff: config.retry_backoff(),
        }
    }
}

pub struct OrchestrationEngine {
    planner: TurnPlanner,
    tools: Arc<ToolRegistry>,
    settings: EngineSettings,
}

impl OrchestrationEngine {
    pub fn new(planner: TurnPlanner, tools: Arc<ToolRegistry>) -> Self {
        Self {
            planner,
            tools,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Drive one turn to a terminal state.
    ///
    /// `history` must already end with the user's message. Completed tool
    /// steps and the final answer are appended as sealed turns. Work that a
    /// cancellation or failure interrupts is discarded.
    pub async fn run_turn(
        &self,
        history: &mut Vec<Turn>,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut tool_cycles = 0usize;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled("planning");
            }
            observer.transition(TurnState::Planning);

            let planned = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled("planning"),
                planned = tokio::time::timeout(
                    self.settings.generation_timeout,
                    self.planner.plan(history),
                ) => planned,
            };

            let plan = match planned {
                Err(_) => Err(self.generation_timeout()),
                Ok(result) => result,
            };

            match plan {
                Err(e) => return self.failed(e.into()),
                Ok(Plan::UseTools(intents)) => {
                    tool_cycles += 1;
                    if tool_cycles > self.settings.max_tool_iterations {
                        return self.failed(TurnError::PlanningLoopExceeded {
                            limit: self.settings.max_tool_iterations,
                        });
                    }
                    if cancel.is_cancelled() {
                        return self.cancelled("tool execution");
                    }
                    observer.transition(TurnState::ToolExecuting);

                    match self.execute_tools(intents, observer, cancel).await {
                        Some(step) => history.push(step),
                        None => return self.cancelled("tool execution"),
                    }
                }
                Ok(Plan::Respond(stream)) => {
                    if cancel.is_cancelled() {
                        return self.cancelled("responding");
                    }
                    observer.transition(TurnState::Responding);
                    return self.respond(stream, history, observer, cancel).await;
                }
            }
        }
    }

    // ── Tool execution ────────────────────────────────────────────────────

    /// Run every intent in order. `None` means the step was cancelled.
    async fn execute_tools(
        &self,
        intents: Vec<ToolIntent>,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Option<Turn> {
        let mut step = OpenTurn::new(Role::Tool);

        for intent in intents {
            if cancel.is_cancelled() {
                return None;
            }
            observer.emit(StreamEvent::ToolInvoked {
                name: intent.name.clone(),
                args: intent.arguments.clone(),
            });

            let invoked_at = Utc::now();
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.dispatch_with_retry(&intent) => result,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = ToolOutcome::from(result);
            match &outcome {
                ToolOutcome::Success { .. } => {
                    info!(tool = %intent.name, elapsed_ms, "Tool call succeeded");
                }
                ToolOutcome::Failure { error_kind, message } => {
                    warn!(tool = %intent.name, kind = %error_kind, elapsed_ms, "Tool call failed: {message}");
                }
            }

            observer.emit(StreamEvent::tool_result(&intent.name, &outcome));
            step.attach_tool_call(ToolCallRecord {
                id: intent.id,
                name: intent.name,
                arguments: intent.arguments,
                outcome,
                invoked_at,
                elapsed_ms,
            });
        }

        Some(step.seal())
    }

    /// Dispatch once, and once more after a short pause if the failure
    /// was transient.
    async fn dispatch_with_retry(&self, intent: &ToolIntent) -> Result<serde_json::Value, ToolError> {
        match self.tools.dispatch(&intent.name, &intent.arguments).await {
            Err(e) if e.is_transient() => {
                warn!(tool = %intent.name, error = %e, "Transient tool failure, retrying once");
                tokio::time::sleep(self.settings.retry_backoff).await;
                self.tools.dispatch(&intent.name, &intent.arguments).await
            }
            other => other,
        }
    }

    // ── Responding ────────────────────────────────────────────────────────

    async fn respond(
        &self,
        mut stream: TokenStream,
        history: &mut Vec<Turn>,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut answer = OpenTurn::new(Role::Assistant);
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled("responding"),
                next = tokio::time::timeout(self.settings.generation_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => return self.failed(self.generation_timeout().into()),
                Ok(None) => break,
                Ok(Some(Err(e))) => return self.failed(e.into()),
                Ok(Some(Ok(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    fragments += 1;
                    answer.push_content(&text);
                    observer.emit(StreamEvent::token(text));
                }
            }
        }

        if cancel.is_cancelled() {
            return self.cancelled("responding");
        }

        debug!(fragments, chars = answer.content().len(), "Answer streamed");
        history.push(answer.seal());
        TurnOutcome::Completed
    }

    // ── Terminal helpers ──────────────────────────────────────────────────

    fn generation_timeout(&self) -> GenerationError {
        GenerationError::Timeout(self.settings.generation_timeout.as_secs())
    }

    fn failed(&self, error: TurnError) -> TurnOutcome {
        warn!(kind = error.kind(), "Turn failed: {error}");
        TurnOutcome::Failed(error)
    }

    fn cancelled(&self, during: &str) -> TurnOutcome {
        info!(during, "Turn cancelled");
        TurnOutcome::Cancelled
    }
}
