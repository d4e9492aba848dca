//! Task tools — create, update, delete, search, and summarize task records.
//!
//! All five share one [`TaskStore`]; store failures become handler errors
//! whose kind and transience come from `HandlerError: From<TaskStoreError>`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use taskrag_core::task::{NewTask, TaskPatch, TaskQuery, TaskStatus, TaskStore};
use taskrag_core::tool::{ArgumentSchema, FieldSpec, HandlerError, ToolHandler};
use uuid::Uuid;

fn to_payload<T: Serialize>(value: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::new(format!("failed to encode result: {e}")))
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn task_id(args: &Map<String, Value>) -> Result<Uuid, HandlerError> {
    str_arg(args, "task_id")
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| HandlerError::new("task_id must be a UUID").with_kind("ValidationError"))
}

fn status_arg(args: &Map<String, Value>) -> Result<Option<TaskStatus>, HandlerError> {
    str_arg(args, "status")
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .map_err(HandlerError::from)
}

fn status_field() -> FieldSpec {
    FieldSpec::one_of("status", &TaskStatus::names())
}

// ── task_create ───────────────────────────────────────────────────────────

pub struct TaskCreateTool {
    store: Arc<dyn TaskStore>,
}

impl TaskCreateTool {
    pub const NAME: &'static str = "task_create";
    pub const DESCRIPTION: &'static str =
        "Create a new task. Use when the user asks to add, remember, or schedule something to do.";

    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .field(
                FieldSpec::string("title")
                    .required()
                    .max_len(200)
                    .describe("Short title of the task"),
            )
            .field(
                FieldSpec::string("description")
                    .max_len(2000)
                    .describe("Optional details"),
            )
    }
}

#[async_trait]
impl ToolHandler for TaskCreateTool {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, HandlerError> {
        let task = self
            .store
            .create(NewTask {
                title: str_arg(&args, "title").unwrap_or_default().to_string(),
                description: str_arg(&args, "description").unwrap_or_default().to_string(),
            })
            .await?;
        to_payload(&task)
    }
}

// ── task_update ───────────────────────────────────────────────────────────

pub struct TaskUpdateTool {
    store: Arc<dyn TaskStore>,
}

impl TaskUpdateTool {
    pub const NAME: &'static str = "task_update";
    pub const DESCRIPTION: &'static str =
        "Update an existing task's title, description, or status (pending, in_progress, completed, cancelled).";

    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .field(FieldSpec::uuid("task_id").required().describe("ID of the task to update"))
            .field(FieldSpec::string("title").max_len(200))
            .field(FieldSpec::string("description").max_len(2000))
            .field(status_field().describe("New status"))
    }
}

#[async_trait]
impl ToolHandler for TaskUpdateTool {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, HandlerError> {
        let id = task_id(&args)?;
        let patch = TaskPatch {
            title: str_arg(&args, "title").map(String::from),
            description: str_arg(&args, "description").map(String::from),
            status: status_arg(&args)?,
        };
        if patch.is_empty() {
            return Err(HandlerError::new(
                "nothing to update: give a title, description, or status",
            ));
        }
        let task = self.store.update(id, patch).await?;
        to_payload(&task)
    }
}

// ── task_delete ───────────────────────────────────────────────────────────

pub struct TaskDeleteTool {
    store: Arc<dyn TaskStore>,
}

impl TaskDeleteTool {
    pub const NAME: &'static str = "task_delete";
    pub const DESCRIPTION: &'static str = "Delete a task permanently.";

    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn schema() -> ArgumentSchema {
        ArgumentSchema::new().field(FieldSpec::uuid("task_id").required().describe("ID of the task to delete"))
    }
}

#[async_trait]
impl ToolHandler for TaskDeleteTool {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, HandlerError> {
        let task = self.store.delete(task_id(&args)?).await?;
        Ok(serde_json::json!({ "deleted": true, "task": to_payload(&task)? }))
    }
}

// ── task_search ───────────────────────────────────────────────────────────

pub struct TaskSearchTool {
    store: Arc<dyn TaskStore>,
}

impl TaskSearchTool {
    pub const NAME: &'static str = "task_search";
    pub const DESCRIPTION: &'static str =
        "List tasks, newest first. Optionally filter by text in the title or description and by status.";

    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .field(FieldSpec::string("query").max_len(200).describe("Text to match"))
            .field(status_field().describe("Only tasks with this status"))
            .field(FieldSpec::integer("limit").range(1, 100).describe("Maximum number of tasks"))
    }
}

#[async_trait]
impl ToolHandler for TaskSearchTool {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, HandlerError> {
        let query = TaskQuery {
            text: str_arg(&args, "query").map(String::from),
            status: status_arg(&args)?,
            limit: Some(args.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize),
        };
        let tasks = self.store.search(query).await?;
        Ok(serde_json::json!({ "count": tasks.len(), "tasks": to_payload(&tasks)? }))
    }
}

// ── task_stats ────────────────────────────────────────────────────────────

pub struct TaskStatsTool {
    store: Arc<dyn TaskStore>,
}

impl TaskStatsTool {
    pub const NAME: &'static str = "task_stats";
    pub const DESCRIPTION: &'static str = "Count tasks in total and per status.";

    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
    }
}

#[async_trait]
impl ToolHandler for TaskStatsTool {
    async fn call(&self, _args: Map<String, Value>) -> Result<Value, HandlerError> {
        let stats = self.store.stats().await?;
        to_payload(&stats)
    }
}
