//! Built-in tools for TaskRAG.
//!
//! Tools give the planner two capabilities: managing the user's task list
//! and searching the user's documents. Every tool is registered through the
//! same `ToolRegistry` interface; the engine never special-cases one by name.

pub mod document_search;
pub mod retrieval;
pub mod task_tools;

use std::sync::Arc;
use std::time::Duration;

use taskrag_core::error::ToolError;
use taskrag_core::task::TaskStore;
use taskrag_core::tool::ToolRegistry;

pub use document_search::DocumentSearchTool;
pub use retrieval::RetrievalGateway;
pub use task_tools::{TaskCreateTool, TaskDeleteTool, TaskSearchTool, TaskStatsTool, TaskUpdateTool};

/// Per-tool dispatch timeouts.
#[derive(Debug, Clone, Copy)]
pub struct ToolTimeouts {
    pub tasks: Duration,
    pub retrieval: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            tasks: Duration::from_secs(30),
            retrieval: Duration::from_secs(20),
        }
    }
}

/// Create a registry with the task tools and document search.
pub fn default_registry(
    tasks: Arc<dyn TaskStore>,
    retrieval: Arc<RetrievalGateway>,
    timeouts: ToolTimeouts,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();

    registry.register(
        TaskCreateTool::NAME,
        TaskCreateTool::DESCRIPTION,
        TaskCreateTool::schema(),
        Arc::new(TaskCreateTool::new(tasks.clone())),
        timeouts.tasks,
    )?;
    registry.register(
        TaskUpdateTool::NAME,
        TaskUpdateTool::DESCRIPTION,
        TaskUpdateTool::schema(),
        Arc::new(TaskUpdateTool::new(tasks.clone())),
        timeouts.tasks,
    )?;
    registry.register(
        TaskDeleteTool::NAME,
        TaskDeleteTool::DESCRIPTION,
        TaskDeleteTool::schema(),
        Arc::new(TaskDeleteTool::new(tasks.clone())),
        timeouts.tasks,
    )?;
    registry.register(
        TaskSearchTool::NAME,
        TaskSearchTool::DESCRIPTION,
        TaskSearchTool::schema(),
        Arc::new(TaskSearchTool::new(tasks.clone())),
        timeouts.tasks,
    )?;
    registry.register(
        TaskStatsTool::NAME,
        TaskStatsTool::DESCRIPTION,
        TaskStatsTool::schema(),
        Arc::new(TaskStatsTool::new(tasks)),
        timeouts.tasks,
    )?;
    registry.register(
        document_search::NAME,
        document_search::DESCRIPTION,
        document_search::schema(),
        Arc::new(DocumentSearchTool::new(retrieval)),
        timeouts.retrieval,
    )?;

    Ok(registry)
}
