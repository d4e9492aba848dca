//! Tool registry — the name-keyed capability map the engine dispatches through.
//!
//! Each tool is registered once with a typed [`ArgumentSchema`], a
//! [`ToolHandler`], and a timeout. `dispatch` validates the model-supplied
//! arguments, runs the handler under the timeout, and maps every failure onto
//! [`ToolError`], so the engine never special-cases a tool by name.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FieldViolation, RetrievalError, TaskStoreError, ToolError};
use crate::provider::ToolDefinition;

// ── Argument schema ───────────────────────────────────────────────────────

/// Accepted JSON type of a single argument.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// A string that parses as a UUID.
    Uuid,
    /// A string drawn from a fixed set.
    Enum(Vec<String>),
}

/// One named argument.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
    pub max_len: Option<usize>,
    pub range: Option<(i64, i64)>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
            max_len: None,
            range: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid)
    }

    pub fn one_of(name: impl Into<String>, values: &[&str]) -> Self {
        Self::new(
            name,
            FieldKind::Enum(values.iter().map(|v| v.to_string()).collect()),
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn check(&self, value: &Value) -> Option<String> {
        match &self.kind {
            FieldKind::String => match value.as_str() {
                None => Some("expected a string".into()),
                Some(s) => match self.max_len {
                    Some(max) if s.chars().count() > max => {
                        Some(format!("longer than {max} characters"))
                    }
                    _ => None,
                },
            },
            FieldKind::Integer => match value.as_i64() {
                None => Some("expected an integer".into()),
                Some(n) => match self.range {
                    Some((lo, hi)) if n < lo || n > hi => {
                        Some(format!("must be between {lo} and {hi}"))
                    }
                    _ => None,
                },
            },
            FieldKind::Number if !value.is_number() => Some("expected a number".into()),
            FieldKind::Boolean if !value.is_boolean() => Some("expected a boolean".into()),
            FieldKind::Number | FieldKind::Boolean => None,
            FieldKind::Uuid => match value.as_str().map(uuid::Uuid::parse_str) {
                Some(Ok(_)) => None,
                _ => Some("expected a UUID string".into()),
            },
            FieldKind::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => None,
                _ => Some(format!("expected one of: {}", allowed.join(", "))),
            },
        }
    }

    fn json_schema(&self) -> Value {
        let mut prop = match &self.kind {
            FieldKind::String => serde_json::json!({ "type": "string" }),
            FieldKind::Integer => serde_json::json!({ "type": "integer" }),
            FieldKind::Number => serde_json::json!({ "type": "number" }),
            FieldKind::Boolean => serde_json::json!({ "type": "boolean" }),
            FieldKind::Uuid => serde_json::json!({ "type": "string", "format": "uuid" }),
            FieldKind::Enum(values) => serde_json::json!({ "type": "string", "enum": values }),
        };
        if !self.description.is_empty() {
            prop["description"] = Value::String(self.description.clone());
        }
        if let Some(max) = self.max_len {
            prop["maxLength"] = Value::from(max);
        }
        if let Some((lo, hi)) = self.range {
            prop["minimum"] = Value::from(lo);
            prop["maximum"] = Value::from(hi);
        }
        prop
    }
}

/// Typed description of a tool's arguments.
#[derive(Debug, Clone, Default)]
pub struct ArgumentSchema {
    fields: Vec<FieldSpec>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// JSON Schema sent to the model.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check `args` and return the accepted mapping.
    ///
    /// All offending fields are reported together. Explicit `null` on an
    /// optional field is treated as absent and dropped.
    pub fn validate(&self, args: &Value) -> Result<Map<String, Value>, Vec<FieldViolation>> {
        let Some(object) = args.as_object() else {
            return Err(vec![FieldViolation::new("$", "arguments must be a JSON object")]);
        };

        let mut violations = Vec::new();
        let mut accepted = Map::new();

        for spec in &self.fields {
            match object.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(FieldViolation::new(&spec.name, "missing required field"));
                    }
                }
                Some(value) => match spec.check(value) {
                    Some(reason) => violations.push(FieldViolation::new(&spec.name, reason)),
                    None => {
                        accepted.insert(spec.name.clone(), value.clone());
                    }
                },
            }
        }

        for key in object.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                violations.push(FieldViolation::new(key, "unknown field"));
            }
        }

        if violations.is_empty() {
            Ok(accepted)
        } else {
            Err(violations)
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// Failure reported by a tool handler.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
    pub transient: bool,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "ToolExecutionError".into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<RetrievalError> for HandlerError {
    fn from(e: RetrievalError) -> Self {
        Self {
            kind: e.kind().into(),
            transient: e.is_transient(),
            message: e.to_string(),
        }
    }
}

impl From<TaskStoreError> for HandlerError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(_) => Self::new(e.to_string()).with_kind("TaskNotFound"),
            TaskStoreError::Invalid(_) => Self::new(e.to_string()),
            TaskStoreError::Unavailable(_) => Self::new(e.to_string()).transient(),
        }
    }
}

/// The callable behind a registered tool.
///
/// Receives arguments that already passed schema validation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, HandlerError>;
}

// ── Registry ──────────────────────────────────────────────────────────────

struct RegisteredTool {
    description: String,
    schema: ArgumentSchema,
    handler: Arc<dyn ToolHandler>,
    timeout: Duration,
}

/// A registry of invocable tools.
///
/// Built once at startup and shared read-only (behind an `Arc`) by every
/// session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique; a second registration is rejected.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ArgumentSchema,
        handler: Arc<dyn ToolHandler>,
        timeout: Duration,
    ) -> Result<(), ToolError> {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.tools.insert(
            name,
            RegisteredTool {
                description: description.into(),
                schema,
                handler,
                timeout,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Tool definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolDefinition {
                name: name.clone(),
                description: tool.description.clone(),
                parameters: tool.schema.to_json_schema(),
            })
            .collect()
    }

    /// Validate `args` and run the named tool under its timeout.
    pub async fn dispatch(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let accepted = tool
            .schema
            .validate(args)
            .map_err(|violations| ToolError::Validation {
                tool: name.to_string(),
                violations,
            })?;

        let started = Instant::now();
        let result = tokio::time::timeout(tool.timeout, tool.handler.call(accepted)).await;
        debug!(
            tool = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool dispatch finished"
        );

        match result {
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                timeout_ms: tool.timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(ToolError::Execution {
                tool: name.to_string(),
                kind: e.kind,
                message: e.message,
                transient: e.transient,
            }),
            Ok(Ok(value)) => Ok(value),
        }
    }
}
