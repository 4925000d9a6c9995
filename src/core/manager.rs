//! Download orchestration
//!
//! Every submitted title becomes a [`DownloadTask`] driven by one background
//! worker. The worker enumerates the title once, then resolves and saves its
//! episodes strictly one after another. Separate tasks run concurrently.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::core::detail_extractor::DetailExtractor;
use crate::core::downloader::{media_extension, MediaDownloader};
use crate::core::error_handling::{RetryExecutor, RetryPolicy};
use crate::core::models::{
    AppError, AppResult, DownloadTask, Episode, EpisodeResult, TaskStatus,
};
use crate::core::registry::TaskRegistry;
use crate::core::task_store::TaskStore;
use crate::core::video_resolver::VideoResolver;
use crate::utils::file_utils::{episode_file_path, sanitize_filename};
use crate::utils::validation::require_non_blank;

/// Error recorded on episodes skipped by cancellation
pub const CANCELLED_EPISODE_ERROR: &str = "cancelled";
/// Top-level error of a cancelled task
pub const CANCELLED_TASK_ERROR: &str = "Task cancelled";

/// Used when a title sanitizes to nothing
const UNTITLED: &str = "Untitled";

/// Knobs the manager takes from configuration
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub output_dir: PathBuf,
    pub retry_policy: RetryPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            retry_policy: RetryPolicy::default(),
        }
    }
}

struct ManagerInner {
    details: Arc<DetailExtractor>,
    resolver: Arc<VideoResolver>,
    downloader: Arc<dyn MediaDownloader>,
    registry: Arc<dyn TaskRegistry>,
    store: TaskStore,
    output_dir: PathBuf,
    retry_executor: RetryExecutor,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
    workers: DashMap<String, AbortHandle>,
}

/// Owns the task lifecycle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    pub fn new(
        details: Arc<DetailExtractor>,
        resolver: Arc<VideoResolver>,
        downloader: Arc<dyn MediaDownloader>,
        registry: Arc<dyn TaskRegistry>,
        store: TaskStore,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                details,
                resolver,
                downloader,
                registry,
                store,
                output_dir: settings.output_dir,
                retry_executor: RetryExecutor::new(settings.retry_policy),
                cancel_flags: DashMap::new(),
                workers: DashMap::new(),
            }),
        }
    }

    /// Register a pending task and start its worker. Returns immediately.
    pub fn submit(&self, anime_url: &str) -> AppResult<String> {
        let anime_url = require_non_blank(anime_url, "anime_url")?;

        let task = DownloadTask::new(anime_url.to_string());
        let task_id = task.task_id.clone();
        self.inner.registry.insert(task);

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner
            .cancel_flags
            .insert(task_id.clone(), Arc::clone(&cancel));

        let worker = tokio::spawn(Arc::clone(&self.inner).run_task(
            task_id.clone(),
            anime_url.to_string(),
            cancel,
        ));
        self.inner
            .workers
            .insert(task_id.clone(), worker.abort_handle());

        // Supervisor: a worker that panics or is aborted must not leave its
        // task in `processing`
        let inner = Arc::clone(&self.inner);
        let supervised_id = task_id.clone();
        tokio::spawn(async move {
            if let Err(join_error) = worker.await {
                let reason = if join_error.is_panic() {
                    "Worker crashed"
                } else {
                    "Worker aborted"
                };
                error!("❌ Task {} worker stopped: {}", supervised_id, reason);
                inner.fail_unfinished(&supervised_id, reason).await;
            }
            inner.cancel_flags.remove(&supervised_id);
            inner.workers.remove(&supervised_id);
        });

        info!("🔄 Submitted download task {} for {}", task_id, anime_url);
        Ok(task_id)
    }

    /// Snapshot of a task. Tasks no longer in the registry are served from
    /// their saved record.
    pub async fn get_status(&self, task_id: &str) -> AppResult<DownloadTask> {
        if let Some(task) = self.inner.registry.get(task_id) {
            return Ok(task);
        }
        debug!("Task {} not in registry, checking saved records", task_id);
        self.inner.store.load(task_id).await
    }

    pub fn list_tasks(&self) -> Vec<DownloadTask> {
        self.inner.registry.list()
    }

    /// Ask a running task to stop after its current episode. No-op for
    /// finished tasks.
    pub fn cancel(&self, task_id: &str) -> AppResult<()> {
        let task = self
            .inner
            .registry
            .get(task_id)
            .ok_or_else(|| AppError::NotFound(format!("Task not found: {}", task_id)))?;
        if task.status.is_terminal() {
            debug!("Task {} already finished, nothing to cancel", task_id);
            return Ok(());
        }
        if let Some(flag) = self.inner.cancel_flags.get(task_id) {
            flag.store(true, Ordering::SeqCst);
        }
        info!("🚫 Cancellation requested for task {}", task_id);
        Ok(())
    }

    /// Drop a finished task from the registry. Its record stays on disk.
    pub fn remove_task(&self, task_id: &str) -> AppResult<DownloadTask> {
        let task = self
            .inner
            .registry
            .get(task_id)
            .ok_or_else(|| AppError::NotFound(format!("Task not found: {}", task_id)))?;
        if !task.status.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "Task {} is still {:?}",
                task_id, task.status
            )));
        }
        self.inner
            .registry
            .remove(task_id)
            .ok_or_else(|| AppError::NotFound(format!("Task not found: {}", task_id)))
    }

    /// Stop every worker and forget all tasks
    pub fn shutdown(&self) {
        let active = self.inner.workers.len();
        for flag in self.inner.cancel_flags.iter() {
            flag.value().store(true, Ordering::SeqCst);
        }
        for worker in self.inner.workers.iter() {
            worker.value().abort();
        }
        self.inner.registry.clear();
        info!("Download manager shut down ({} active workers stopped)", active);
    }
}

impl ManagerInner {
    #[instrument(skip(self, cancel))]
    async fn run_task(
        self: Arc<Self>,
        task_id: String,
        anime_url: String,
        cancel: Arc<AtomicBool>,
    ) {
        if self
            .update(&task_id, |task| {
                task.status = TaskStatus::Processing;
                task.started_at = Some(chrono::Utc::now());
            })
            .is_none()
        {
            return;
        }

        if cancel.load(Ordering::SeqCst) {
            self.finish(&task_id, TaskStatus::Failed, Some(CANCELLED_TASK_ERROR.to_string()))
                .await;
            return;
        }

        let detail = match self.details.details(&anime_url).await {
            Ok(detail) => detail,
            Err(e) => {
                error!("❌ Failed to enumerate {}: {}", anime_url, e);
                self.finish(&task_id, TaskStatus::Failed, Some(e.to_string()))
                    .await;
                return;
            }
        };

        let title = match sanitize_filename(&detail.title) {
            title if title.is_empty() => UNTITLED.to_string(),
            title => title,
        };
        let total = detail.episode_count();
        info!("Downloading {} episodes of {}", total, title);
        self.update(&task_id, |task| {
            task.anime_title = Some(title.clone());
            task.total_episodes = Some(total);
        });

        for (index, episode) in detail.episodes().enumerate() {
            let result = if cancel.load(Ordering::SeqCst) {
                EpisodeResult::failure(episode, None, CANCELLED_EPISODE_ERROR)
            } else {
                info!(
                    "Processing S{}E{} ({}/{})",
                    episode.season,
                    episode.number,
                    index + 1,
                    total
                );
                self.process_episode(&title, episode).await
            };
            self.update(&task_id, |task| task.results.push(result.clone()));
        }

        if cancel.load(Ordering::SeqCst) {
            warn!("Task {} cancelled", task_id);
            self.finish(&task_id, TaskStatus::Failed, Some(CANCELLED_TASK_ERROR.to_string()))
                .await;
        } else {
            self.finish(&task_id, TaskStatus::Completed, None).await;
        }
    }

    /// Resolve and save one episode. Never fails; the outcome is the result.
    async fn process_episode(&self, title: &str, episode: &Episode) -> EpisodeResult {
        let label = format!("S{}E{}", episode.season, episode.number);

        let video_url = match self
            .retry_executor
            .execute(&label, |_| self.resolver.resolve(&episode.url))
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not resolve {} ({}): {}", label, episode.url, e);
                return EpisodeResult::failure(episode, None, e.to_string());
            }
        };

        let destination = episode_file_path(
            &self.output_dir,
            title,
            episode.season,
            episode.number,
            media_extension(&video_url),
        );

        match self
            .retry_executor
            .execute(&label, |_| self.downloader.download(&video_url, &destination))
            .await
        {
            Ok(bytes) => {
                info!("✅ Saved {} -> {}", label, destination.display());
                EpisodeResult::success(
                    episode,
                    video_url,
                    destination.to_string_lossy().into_owned(),
                    bytes,
                )
            }
            Err(e) => {
                warn!("Download of {} failed: {}", label, e);
                EpisodeResult::failure(episode, Some(video_url), e.to_string())
            }
        }
    }

    /// Registry update; `None` once the task is gone (shutdown)
    fn update(
        &self,
        task_id: &str,
        mut mutate: impl FnMut(&mut DownloadTask),
    ) -> Option<DownloadTask> {
        match self.registry.update(task_id, &mut mutate) {
            Ok(task) => Some(task),
            Err(e) => {
                debug!("Dropping update for {}: {}", task_id, e);
                None
            }
        }
    }

    async fn finish(&self, task_id: &str, status: TaskStatus, error: Option<String>) {
        let snapshot = self.update(task_id, |task| {
            task.status = status;
            task.error = error.clone();
            task.completed_at = Some(chrono::Utc::now());
        });
        if let Some(task) = snapshot {
            let summary = task.summary();
            info!(
                "Task {} finished as {:?}: {} succeeded, {} failed",
                task_id, status, summary.succeeded, summary.failed
            );
            self.persist(&task).await;
        }
    }

    async fn fail_unfinished(&self, task_id: &str, reason: &str) {
        let mut changed = false;
        let snapshot = self.update(task_id, |task| {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Failed;
                task.error = Some(reason.to_string());
                task.completed_at = Some(chrono::Utc::now());
                changed = true;
            }
        });
        if let (true, Some(task)) = (changed, snapshot) {
            self.persist(&task).await;
        }
    }

    async fn persist(&self, task: &DownloadTask) {
        match self.store.save(task).await {
            Ok(path) => info!("Saved download record to {}", path.display()),
            Err(e) => error!("Failed to save record for task {}: {}", task.task_id, e),
        }
    }
}
