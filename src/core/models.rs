//! Core data models for the animecix downloader

use serde::{Deserialize, Serialize};

/// A single hit on the site's search page

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,

    pub url: String,
}

/// One episode page of a season

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Episode {
    pub season: u32,

    pub number: u32,

    pub url: String,
}

/// A season with its episodes, ordered by episode number

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Season {
    pub season_number: u32,

    pub episodes: Vec<Episode>,
}

/// Full structure of a title as enumerated from the site

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TitleDetail {
    pub title: String,

    pub url: String,

    pub seasons: Vec<Season>,
}

impl TitleDetail {
    /// Total number of episodes across every season
    pub fn episode_count(&self) -> usize {
        self.seasons.iter().map(|s| s.episodes.len()).sum()
    }

    /// All episodes flattened in (season, number) order
    pub fn episodes(&self) -> impl Iterator<Item = &Episode> {
        self.seasons.iter().flat_map(|s| s.episodes.iter())
    }
}

/// Task status enumeration

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,

    Processing,

    Completed,

    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Outcome of a single episode inside a download task

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Success,

    Failed,
}

/// Per-episode record appended by the worker

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeResult {
    pub season: u32,

    pub number: u32,

    pub page_url: String,

    pub video_url: Option<String>,

    pub file_path: Option<String>,

    pub bytes_written: Option<u64>,

    pub status: EpisodeStatus,

    pub error: Option<String>,
}

impl EpisodeResult {
    pub fn success(episode: &Episode, video_url: String, file_path: String, bytes: u64) -> Self {
        Self {
            season: episode.season,
            number: episode.number,
            page_url: episode.url.clone(),
            video_url: Some(video_url),
            file_path: Some(file_path),
            bytes_written: Some(bytes),
            status: EpisodeStatus::Success,
            error: None,
        }
    }

    pub fn failure(episode: &Episode, video_url: Option<String>, error: impl Into<String>) -> Self {
        Self {
            season: episode.season,
            number: episode.number,
            page_url: episode.url.clone(),
            video_url,
            file_path: None,
            bytes_written: None,
            status: EpisodeStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Background job downloading every episode of one title

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub task_id: String,

    pub anime_url: String,

    pub anime_title: Option<String>,

    pub status: TaskStatus,

    pub total_episodes: Option<usize>,

    pub results: Vec<EpisodeResult>,

    pub error: Option<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,

    pub started_at: Option<chrono::DateTime<chrono::Utc>>,

    pub updated_at: chrono::DateTime<chrono::Utc>,

    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadTask {
    pub fn new(anime_url: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            anime_url,
            anime_title: None,
            status: TaskStatus::Pending,
            total_episodes: None,
            results: Vec::new(),
            error: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn summary(&self) -> TaskSummary {
        let succeeded = self
            .results
            .iter()
            .filter(|r| r.status == EpisodeStatus::Success)
            .count();
        TaskSummary {
            total: self.total_episodes.unwrap_or(self.results.len()),
            succeeded,
            failed: self.results.len() - succeeded,
        }
    }
}

/// Aggregated counts of a task's episode results

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,

    pub succeeded: usize,

    pub failed: usize,
}

/// Response returned right after a download was submitted

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,

    pub message: String,
}

/// Status view served to pollers. `results` and `summary` only appear once
/// the task is terminal.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task_id: String,

    pub status: TaskStatus,

    pub anime_url: String,

    pub anime_title: Option<String>,

    pub total_episodes: Option<usize>,

    pub processed: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<EpisodeResult>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TaskSummary>,

    pub error: Option<String>,
}

impl From<DownloadTask> for TaskStatusReport {
    fn from(task: DownloadTask) -> Self {
        let terminal = task.status.is_terminal();
        let summary = terminal.then(|| task.summary());
        Self {
            processed: task.results.len(),
            summary,
            results: if terminal { Some(task.results) } else { None },
            task_id: task.task_id,
            status: task.status,
            anime_url: task.anime_url,
            anime_title: task.anime_title,
            total_episodes: task.total_episodes,
            error: task.error,
        }
    }
}

/// Application error types

#[derive(Debug, thiserror::Error)]

pub enum AppError {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("System error: {0}")]
    System(String),
}

/// Result type alias for application operations

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(season: u32, number: u32) -> Episode {
        Episode {
            season,
            number,
            url: format!("https://animecix.tv/titles/1/x/season/{season}/episode/{number}"),
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_report_hides_results_until_terminal() {
        let mut task = DownloadTask::new("https://animecix.tv/titles/1/x".to_string());
        task.status = TaskStatus::Processing;
        task.total_episodes = Some(2);
        task.results.push(EpisodeResult::success(
            &episode(1, 1),
            "https://cdn/1.mp4".to_string(),
            "data/x.mp4".to_string(),
            10,
        ));

        let report = TaskStatusReport::from(task.clone());
        assert_eq!(report.processed, 1);
        assert!(report.results.is_none());
        assert!(report.summary.is_none());

        task.results
            .push(EpisodeResult::failure(&episode(1, 2), None, "boom"));
        task.status = TaskStatus::Completed;
        let report = TaskStatusReport::from(task);
        let summary = report.summary.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(report.results.unwrap().len(), 2);
    }

    #[test]
    fn test_title_detail_flattens_in_order() {
        let detail = TitleDetail {
            title: "X".to_string(),
            url: "https://animecix.tv/titles/1/x".to_string(),
            seasons: vec![
                Season {
                    season_number: 1,
                    episodes: vec![episode(1, 1), episode(1, 2)],
                },
                Season {
                    season_number: 2,
                    episodes: vec![episode(2, 1)],
                },
            ],
        };
        assert_eq!(detail.episode_count(), 3);
        let order: Vec<_> = detail.episodes().map(|e| (e.season, e.number)).collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (2, 1)]);
    }
}
