//! Turn and ToolCall domain types.
//!
//! A session's history is an append-only list of [`Turn`]s. The engine builds
//! a turn as an [`OpenTurn`] and seals it; sealed turns have no mutators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ToolError;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant's final answer
    Assistant,
    /// A batch of tool calls requested by the planner, with their results
    Tool,
}

/// Result attached to a [`ToolCallRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        payload: serde_json::Value,
    },
    Failure {
        error_kind: String,
        message: String,
    },
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Text the planner sees as the observation for this call.
    pub fn to_observation(&self) -> String {
        match self {
            Self::Success { payload } => payload.to_string(),
            Self::Failure {
                error_kind,
                message,
            } => serde_json::json!({ "error": error_kind, "message": message }).to_string(),
        }
    }
}

impl From<std::result::Result<serde_json::Value, ToolError>> for ToolOutcome {
    fn from(result: std::result::Result<serde_json::Value, ToolError>) -> Self {
        match result {
            Ok(payload) => Self::Success { payload },
            Err(e) => Self::Failure {
                error_kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// A finished tool invocation. Only built once the outcome is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Call ID issued by the planner (matches the model's tool_call.id)
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub outcome: ToolOutcome,
    pub invoked_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// One entry in a session's history. Always complete; build with [`OpenTurn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    id: String,
    role: Role,
    content: String,
    tool_calls: Vec<ToolCallRecord>,
    created_at: DateTime<Utc>,
}

impl Turn {
    /// A user message. Complete on arrival.
    pub fn user(content: impl Into<String>) -> Self {
        let mut turn = OpenTurn::new(Role::User);
        turn.content = content.into();
        turn.seal()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn is_complete(&self) -> bool {
        true
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A turn still being produced by the engine.
///
/// Content streams in and tool-call records are attached as they finish.
/// [`OpenTurn::seal`] turns it into a read-only [`Turn`]; dropping it instead
/// discards the partial work.
#[derive(Debug)]
pub struct OpenTurn {
    id: String,
    role: Role,
    content: String,
    tool_calls: Vec<ToolCallRecord>,
    created_at: DateTime<Utc>,
}

impl OpenTurn {
    pub fn new(role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: String::new(),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_complete(&self) -> bool {
        false
    }

    pub fn push_content(&mut self, text: &str) {
        self.content.push_str(text);
    }

    pub fn attach_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }

    pub fn seal(self) -> Turn {
        Turn {
            id: self.id,
            role: self.role,
            content: self.content,
            tool_calls: self.tool_calls,
            created_at: self.created_at,
        }
    }
}
