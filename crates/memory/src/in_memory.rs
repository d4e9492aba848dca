//! In-memory task store — useful for testing and single-process deployments.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskrag_core::error::TaskStoreError;
use taskrag_core::task::{NewTask, Task, TaskPatch, TaskQuery, TaskStats, TaskStatus, TaskStore};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 2000;

/// A task store that keeps records in a `Vec`, oldest first.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn clean_title(title: &str) -> Result<String, TaskStoreError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TaskStoreError::Invalid("title must not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(TaskStoreError::Invalid(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

fn clean_description(description: &str) -> Result<String, TaskStoreError> {
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(TaskStoreError::Invalid(format!(
            "description must be at most {MAX_DESCRIPTION_CHARS} characters"
        )));
    }
    Ok(description.trim().to_string())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task, TaskStoreError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: clean_title(&task.title)?,
            description: clean_description(&task.description)?,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.tasks.write().await.push(task.clone());
        debug!(task_id = %task.id, "Task created");
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Task, TaskStoreError> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(TaskStoreError::NotFound(id))
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, TaskStoreError> {
        let title = patch.title.as_deref().map(clean_title).transpose()?;
        let description = patch.description.as_deref().map(clean_description).transpose()?;

        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TaskStoreError::NotFound(id))?;

        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = description {
            task.description = description;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<Task, TaskStoreError> {
        let mut tasks = self.tasks.write().await;
        let index = tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskStoreError::NotFound(id))?;
        Ok(tasks.remove(index))
    }

    async fn search(&self, query: TaskQuery) -> Result<Vec<Task>, TaskStoreError> {
        let tasks = self.tasks.read().await;
        let needle = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        let results = tasks
            .iter()
            .rev()
            .filter(|t| query.status.is_none_or(|s| t.status == s))
            .filter(|t| {
                needle.as_deref().is_none_or(|n| {
                    t.title.to_lowercase().contains(n) || t.description.to_lowercase().contains(n)
                })
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(results)
    }

    async fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        let tasks = self.tasks.read().await;
        let mut by_status: BTreeMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for task in tasks.iter() {
            *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
        }
        Ok(TaskStats {
            total: tasks.len(),
            by_status,
        })
    }
}
