//! Stream events emitted by the orchestration engine.
//!
//! Events are ordered within a session and never persisted. Every started
//! turn produces exactly one terminal event: `turn_complete`, `error`, or
//! `cancelled`.

use serde::{Deserialize, Serialize};

use crate::message::ToolOutcome;

/// One element of a turn's event sequence.
///
/// Serialized with a `type` tag:
/// - `token`         — generated text fragment
/// - `tool_invoked`  — a tool call is about to run
/// - `tool_result`   — the tool call finished (successfully or not)
/// - `turn_complete` — the answer has been fully streamed
/// - `error`         — the turn failed
/// - `cancelled`     — the turn was cancelled by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        text: String,
    },

    ToolInvoked {
        name: String,
        args: serde_json::Value,
    },

    ToolResult {
        name: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },

    TurnComplete,

    Error {
        kind: String,
        message: String,
    },

    Cancelled,
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn tool_result(name: impl Into<String>, outcome: &ToolOutcome) -> Self {
        let name = name.into();
        match outcome {
            ToolOutcome::Success { payload } => Self::ToolResult {
                name,
                ok: true,
                payload: Some(payload.clone()),
                error_kind: None,
            },
            ToolOutcome::Failure { error_kind, .. } => Self::ToolResult {
                name,
                ok: false,
                payload: None,
                error_kind: Some(error_kind.clone()),
            },
        }
    }

    /// Wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolInvoked { .. } => "tool_invoked",
            Self::ToolResult { .. } => "tool_result",
            Self::TurnComplete => "turn_complete",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnComplete | Self::Error { .. } | Self::Cancelled)
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Self::Token { .. })
    }
}
