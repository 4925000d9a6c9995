//! Durable per-task records
//!
//! Each task that reaches a terminal state is written to
//! `downloads_{task_id}.json` in the records directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::models::{AppError, AppResult, DownloadTask};

#[derive(Debug, Clone)]
pub struct TaskStore {
    directory: PathBuf,
}

impl TaskStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn record_path(&self, task_id: &str) -> PathBuf {
        self.directory.join(format!("downloads_{}.json", task_id))
    }

    /// Write the snapshot to a temp file and rename it into place
    pub async fn save(&self, task: &DownloadTask) -> AppResult<PathBuf> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let path = self.record_path(&task.task_id);
        let temp_path = self
            .directory
            .join(format!(".downloads_{}.json.tmp", task.task_id));
        let json = serde_json::to_string_pretty(task)?;

        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        debug!("Saved task record {}", path.display());
        Ok(path)
    }

    pub async fn load(&self, task_id: &str) -> AppResult<DownloadTask> {
        if !is_valid_task_id(task_id) {
            return Err(AppError::NotFound(format!("Task not found: {}", task_id)));
        }
        let path = self.record_path(task_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Task not found: {}", task_id)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}

/// Task ids are UUIDs; anything else must not reach the filesystem
fn is_valid_task_id(task_id: &str) -> bool {
    uuid::Uuid::parse_str(task_id).is_ok()
}
