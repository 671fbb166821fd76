//! Download manager implementation.
//!
//! # Architecture
//!
//! - **Manager**: owns the ordered task list and user actions
//! - **Runner loop**: a single long-lived worker that pops `queued` tasks and
//!   runs one pull at a time
//! - `Notify` for wake-on-work; `CancellationToken` per active task
//!
//! Pause and cancel both trip the active task's cancellation handle; the two
//! differ only in the post-state they record. The runner re-reads the task's
//! state after the pull returns and never overwrites a state the user set
//! while the pull was winding down.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use modelpull_core::session::{self, state as session_state, STAGING_SUFFIX};
use modelpull_core::{
    sanitize_model_name, ProgressCounter, ProgressSnapshot, PullError, PullResult, TaskSnapshot,
    TaskState,
};
use modelpull_registry::{PullRequest, PullRunner};

/// A manager-owned task record.
struct Task {
    id: u64,
    model: String,
    sanitized: String,
    state: TaskState,
    message: String,
    zip_name: String,
    zip_path: PathBuf,
    staging_root: PathBuf,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    progress: Arc<ProgressCounter>,
    /// Present only while the task is downloading.
    cancel: Option<CancellationToken>,
}

impl Task {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            model: self.model.clone(),
            sanitized: self.sanitized.clone(),
            state: self.state,
            message: self.message.clone(),
            zip_name: self.zip_name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            progress: self.progress.snapshot(),
        }
    }

    fn transition(&mut self, state: TaskState, message: impl Into<String>) {
        self.state = state;
        self.message = message.into();
        self.updated_at = Utc::now();
    }
}

/// Concurrent download manager over a [`PullRunner`].
pub struct DownloadManager {
    runner: Arc<dyn PullRunner>,
    output_dir: PathBuf,
    tasks: Mutex<Vec<Task>>,
    next_id: AtomicU64,
    queue_notify: Notify,
    runner_started: AtomicBool,
}

impl DownloadManager {
    /// Create a manager. `output_dir` is the downloads root where staging
    /// directories and finished archives live.
    pub fn new(runner: Arc<dyn PullRunner>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            output_dir: output_dir.into(),
            tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue_notify: Notify::new(),
            runner_started: AtomicBool::new(false),
        }
    }

    /// The downloads root.
    #[must_use]
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Start the runner loop. Idempotent; the runner lives as long as the
    /// manager.
    pub fn ensure_runner(self: &Arc<Self>) {
        if self
            .runner_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.run_loop().await;
            });
        }
    }

    /// Register existing `*.staging` sessions as paused tasks.
    ///
    /// Call once at startup, before the control plane goes live. Resuming a
    /// recovered task re-enters the same staging directory and picks up from
    /// the bytes already on disk.
    pub async fn recover_sessions(&self) {
        let sessions = session::discover_sessions(&self.output_dir);
        if sessions.is_empty() {
            return;
        }

        let mut tasks = self.tasks.lock().await;
        let known: HashSet<String> = tasks.iter().map(|t| t.sanitized.clone()).collect();

        for (staging_root, meta) in sessions {
            let model = if meta.model.is_empty() {
                meta.session_id.clone()
            } else {
                meta.model.clone()
            };
            if model.is_empty() {
                continue;
            }
            let sanitized = sanitize_model_name(&model);
            if known.contains(&sanitized) {
                continue;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let zip_name = format!("{sanitized}.zip");
            let now = Utc::now();
            tracing::info!(model, staging = %staging_root.display(), "recovered session");
            tasks.push(Task {
                id,
                model,
                sanitized,
                state: TaskState::Paused,
                message: "recovered from disk".to_string(),
                zip_path: self.output_dir.join(&zip_name),
                zip_name,
                staging_root,
                created_at: now,
                updated_at: now,
                progress: Arc::new(ProgressCounter::new()),
                cancel: None,
            });
        }
    }

    /// Append a new queued task for `model`.
    pub async fn enqueue(&self, model: &str) -> PullResult<u64> {
        let model = model.trim();
        if model.is_empty() {
            return Err(PullError::other("model reference must not be empty"));
        }

        let sanitized = sanitize_model_name(model);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let zip_name = format!("{sanitized}.zip");
        let now = Utc::now();

        let task = Task {
            id,
            model: model.to_string(),
            sanitized: sanitized.clone(),
            state: TaskState::Queued,
            message: "queued".to_string(),
            zip_path: self.output_dir.join(&zip_name),
            zip_name,
            staging_root: self
                .output_dir
                .join(format!("{sanitized}{STAGING_SUFFIX}")),
            created_at: now,
            updated_at: now,
            progress: Arc::new(ProgressCounter::new()),
            cancel: None,
        };

        tracing::info!(model, id, "enqueued download");
        self.tasks.lock().await.push(task);
        self.queue_notify.notify_one();
        Ok(id)
    }

    /// Pause a queued or downloading task.
    pub async fn pause(&self, id: u64) -> PullResult<()> {
        let staging = {
            let mut tasks = self.tasks.lock().await;
            let task = find_task(&mut tasks, id)?;
            match task.state {
                TaskState::Downloading | TaskState::Queued => {
                    if let Some(cancel) = task.cancel.take() {
                        cancel.cancel();
                    }
                    task.transition(TaskState::Paused, "paused");
                    task.staging_root.clone()
                }
                state => {
                    return Err(PullError::IllegalTransition {
                        action: "pause".to_string(),
                        state: state.as_str().to_string(),
                    })
                }
            }
        };

        annotate_session(&staging, session_state::PAUSED, "paused");
        Ok(())
    }

    /// Re-queue a paused, errored, or canceled task. Progress restarts from
    /// zero; the on-disk bytes are re-accounted when the pull begins.
    pub async fn resume(&self, id: u64) -> PullResult<()> {
        {
            let mut tasks = self.tasks.lock().await;
            let task = find_task(&mut tasks, id)?;
            match task.state {
                TaskState::Paused | TaskState::Error | TaskState::Canceled => {
                    task.progress = Arc::new(ProgressCounter::new());
                    task.transition(TaskState::Queued, "queued");
                }
                state => {
                    return Err(PullError::IllegalTransition {
                        action: "resume".to_string(),
                        state: state.as_str().to_string(),
                    })
                }
            }
        }

        self.queue_notify.notify_one();
        Ok(())
    }

    /// Cancel a queued, downloading, or paused task.
    pub async fn cancel(&self, id: u64) -> PullResult<()> {
        let staging = {
            let mut tasks = self.tasks.lock().await;
            let task = find_task(&mut tasks, id)?;
            match task.state {
                TaskState::Downloading | TaskState::Queued | TaskState::Paused => {
                    if let Some(cancel) = task.cancel.take() {
                        cancel.cancel();
                    }
                    task.transition(TaskState::Canceled, "canceled");
                    task.staging_root.clone()
                }
                state => {
                    return Err(PullError::IllegalTransition {
                        action: "cancel".to_string(),
                        state: state.as_str().to_string(),
                    })
                }
            }
        };

        annotate_session(&staging, session_state::NONE, "canceled");
        Ok(())
    }

    /// Snapshots of every task, in enqueue order.
    pub async fn snapshot_tasks(&self) -> Vec<TaskSnapshot> {
        self.tasks.lock().await.iter().map(Task::snapshot).collect()
    }

    /// Progress of the active task, if one is downloading.
    pub async fn active_progress(&self) -> ProgressSnapshot {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|t| t.state == TaskState::Downloading)
            .map(|t| t.progress.snapshot())
            .unwrap_or_default()
    }

    /// The main runner loop: drain queued tasks one at a time, sleep on the
    /// notifier when idle.
    async fn run_loop(&self) {
        loop {
            if let Some((id, request)) = self.next_job().await {
                let result = self.runner.run(request).await;
                self.finalize_job(id, result).await;
                self.queue_notify.notify_one();
            } else {
                self.queue_notify.notified().await;
            }
        }
    }

    /// Pop the first queued task, transitioning it to downloading.
    async fn next_job(&self) -> Option<(u64, PullRequest)> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.iter_mut().find(|t| t.state == TaskState::Queued)?;

        let cancel = CancellationToken::new();
        task.cancel = Some(cancel.clone());
        task.transition(TaskState::Downloading, "downloading");

        Some((
            task.id,
            PullRequest {
                model: task.model.clone(),
                staging_root: task.staging_root.clone(),
                out_zip: task.zip_path.clone(),
                progress: Arc::clone(&task.progress),
                cancel,
            },
        ))
    }

    /// Record the pull's outcome, unless the user changed the state first.
    async fn finalize_job(&self, id: u64, result: Result<(), PullError>) {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return;
        };
        task.cancel = None;

        if task.state != TaskState::Downloading {
            // Pause or cancel won the race; their state stands.
            tracing::debug!(id, state = %task.state, "pull ended in user-set state");
            return;
        }

        match result {
            Ok(()) => {
                tracing::info!(id, model = %task.model, "download complete");
                task.transition(TaskState::Done, "completed");
            }
            Err(err) if err.is_canceled() => {
                // Cancellation without a user transition (e.g. shutdown).
                task.transition(TaskState::Canceled, "canceled");
            }
            Err(err) => {
                tracing::warn!(id, model = %task.model, error = %err, "download failed");
                task.transition(TaskState::Error, err.to_string());
            }
        }
    }
}

fn find_task(tasks: &mut [Task], id: u64) -> PullResult<&mut Task> {
    tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or(PullError::TaskNotFound { id })
}

/// Best-effort session annotation for pause/cancel. Only an existing session
/// is touched; a queued task that never started has nothing on disk.
fn annotate_session(staging_root: &std::path::Path, state: &str, message: &str) {
    let Some(mut meta) = session::load_session(staging_root) else {
        return;
    };
    meta.state = state.to_string();
    meta.message = message.to_string();
    meta.touch();
    if let Err(err) = session::save_session(staging_root, &meta) {
        tracing::warn!(error = %err, "failed to annotate session");
    }
}
