//! Process-wide task registry
//!
//! Maps task ids to the live [`DownloadTask`] state. Readers always get an
//! owned snapshot, so polling never holds a shard lock across an await.

use dashmap::DashMap;

use crate::core::models::{AppError, AppResult, DownloadTask};

pub trait TaskRegistry: Send + Sync {
    fn insert(&self, task: DownloadTask);

    /// Snapshot of one task
    fn get(&self, task_id: &str) -> Option<DownloadTask>;

    /// Apply `mutate` under the entry lock and return the updated snapshot
    fn update(
        &self,
        task_id: &str,
        mutate: &mut dyn FnMut(&mut DownloadTask),
    ) -> AppResult<DownloadTask>;

    /// Snapshots of every task, oldest first
    fn list(&self) -> Vec<DownloadTask>;

    fn remove(&self, task_id: &str) -> Option<DownloadTask>;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`TaskRegistry`] on a sharded concurrent map
#[derive(Debug, Default)]
pub struct InMemoryTaskRegistry {
    tasks: DashMap<String, DownloadTask>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskRegistry for InMemoryTaskRegistry {
    fn insert(&self, task: DownloadTask) {
        self.tasks.insert(task.task_id.clone(), task);
    }

    fn get(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    fn update(
        &self,
        task_id: &str,
        mutate: &mut dyn FnMut(&mut DownloadTask),
    ) -> AppResult<DownloadTask> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::NotFound(format!("Task not found: {}", task_id)))?;
        mutate(entry.value_mut());
        entry.value_mut().updated_at = chrono::Utc::now();
        Ok(entry.value().clone())
    }

    fn list(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> =
            self.tasks.iter().map(|entry| entry.value().clone()).collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    fn remove(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks.remove(task_id).map(|(_, task)| task)
    }

    fn clear(&self) {
        self.tasks.clear();
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TaskStatus;
    use std::sync::Arc;

    #[test]
    fn test_snapshots_are_detached() {
        let registry = InMemoryTaskRegistry::new();
        let task = DownloadTask::new("https://animecix.tv/titles/1/a".into());
        let id = task.task_id.clone();
        registry.insert(task);

        let mut snapshot = registry.get(&id).unwrap();
        snapshot.status = TaskStatus::Failed;
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_update_unknown_task() {
        let registry = InMemoryTaskRegistry::new();
        let result = registry.update("missing", &mut |task| task.status = TaskStatus::Processing);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_list_remove_clear() {
        let registry = InMemoryTaskRegistry::new();
        let first = DownloadTask::new("https://animecix.tv/titles/1/a".into());
        let second = DownloadTask::new("https://animecix.tv/titles/1/a".into());
        let first_id = first.task_id.clone();
        registry.insert(first);
        registry.insert(second);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list()[0].task_id, first_id);
        assert!(registry.remove(&first_id).is_some());
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates() {
        let registry = Arc::new(InMemoryTaskRegistry::new());
        let task = DownloadTask::new("https://animecix.tv/titles/1/a".into());
        let id = task.task_id.clone();
        registry.insert(task);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    registry
                        .update(&id, &mut |task| {
                            task.total_episodes = Some(task.total_episodes.unwrap_or(0) + 1)
                        })
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.get(&id).unwrap().total_episodes, Some(200));
    }
}
