//! Module Completion Progress
//!
//! The engine produces exactly one progress event per module visit: marking
//! the (lesson, module) pair complete when the module's completing step is
//! reached. Persistence layout is owned by the implementor.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::info;

/// Destination for module-completion events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Marks a module complete for a lesson. Called exactly once per
    /// module's completing step.
    async fn mark_module_complete(&self, lesson_id: &str, module_id: &str) -> Result<()>;
}

/// An in-memory `ProgressStore` for development and integration testing.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    completed: Mutex<HashSet<(String, String)>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_complete(&self, lesson_id: &str, module_id: &str) -> bool {
        self.completed
            .lock()
            .await
            .contains(&(lesson_id.to_string(), module_id.to_string()))
    }

    pub async fn completed_count(&self) -> usize {
        self.completed.lock().await.len()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn mark_module_complete(&self, lesson_id: &str, module_id: &str) -> Result<()> {
        info!(%lesson_id, %module_id, "Marking module complete");
        self.completed
            .lock()
            .await
            .insert((lesson_id.to_string(), module_id.to_string()));
        Ok(())
    }
}
