//! Error types for the TaskRAG domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum, and every enum exposes a
//! stable `kind()` string that is what consumers see on the event stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The top-level error type for all TaskRAG operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Generation errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Task store errors ---
    #[error("Task store error: {0}")]
    TaskStore(#[from] TaskStoreError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// One offending field reported by argument validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid arguments for {tool}: {}", join_violations(.violations))]
    Validation {
        tool: String,
        violations: Vec<FieldViolation>,
    },

    #[error("Tool timed out: {tool} after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Tool execution failed: {tool} ({kind}): {message}")]
    Execution {
        tool: String,
        kind: String,
        message: String,
        transient: bool,
    },
}

impl ToolError {
    /// Wire-level kind reported in `tool_result.error_kind`.
    ///
    /// Execution failures report the handler's own kind (for example
    /// `RetrievalError`), falling back to `ToolExecutionError`.
    pub fn kind(&self) -> &str {
        match self {
            Self::NotFound(_) => "ToolNotFound",
            Self::AlreadyRegistered(_) => "ToolAlreadyRegistered",
            Self::Validation { .. } => "ValidationError",
            Self::Timeout { .. } => "ToolTimeoutError",
            Self::Execution { kind, .. } => kind,
        }
    }

    /// Whether a single retry is worthwhile.
    ///
    /// Timeouts are always transient. Execution failures are transient only
    /// when the handler said so. Everything else is deterministic.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Execution { transient, .. } => *transient,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl RetrievalError {
    pub fn kind(&self) -> &'static str {
        "RetrievalError"
    }

    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidQuery(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Generation capability unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed generation output: {0}")]
    Malformed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        "GenerationError"
    }
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Session {0} already has an active turn")]
    Busy(String),

    #[error("Session not found: {0}")]
    NotFound(String),
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Busy(_) => "SessionBusyError",
            Self::NotFound(_) => "SessionNotFoundError",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TaskStoreError {
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid task: {0}")]
    Invalid(String),

    #[error("Task store unavailable: {0}")]
    Unavailable(String),
}

/// Failures that end a turn with an `error` event.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("Planning loop exceeded {limit} tool iterations")]
    PlanningLoopExceeded { limit: usize },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The turn task panicked.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanningLoopExceeded { .. } => "PlanningLoopExceeded",
            Self::Generation(e) => e.kind(),
            Self::Internal(_) => "InternalError",
        }
    }
}
