//! Per-model download job record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Mutable outcome fields, written by the worker as the job progresses.
#[derive(Debug, Default)]
pub(crate) struct JobOutcome {
    pub ended_at: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
    pub error: Option<String>,
    pub pid: Option<u32>,
}

/// One background fetch attempt for one model name.
///
/// The job owns its fetch subprocess exclusively; `cancel` is the only other
/// code path allowed to signal it, through the shared child handle.
pub struct DownloadJob {
    pub repo_id: String,
    pub target_dir: PathBuf,
    pub revision: Option<String>,
    pub log_file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub(crate) outcome: Mutex<JobOutcome>,
    pub(crate) child: tokio::sync::Mutex<Option<Child>>,
    pub(crate) has_child: AtomicBool,
    pub(crate) child_exited: AtomicBool,
    pub(crate) worker: OnceLock<JoinHandle<()>>,
}

impl DownloadJob {
    pub(crate) fn new(
        repo_id: impl Into<String>,
        target_dir: PathBuf,
        revision: Option<String>,
        log_file: PathBuf,
    ) -> Self {
        Self {
            repo_id: repo_id.into(),
            target_dir,
            revision,
            log_file,
            started_at: Utc::now(),
            outcome: Mutex::new(JobOutcome::default()),
            child: tokio::sync::Mutex::new(None),
            has_child: AtomicBool::new(false),
            child_exited: AtomicBool::new(false),
            worker: OnceLock::new(),
        }
    }

    /// Running while the worker task is alive, or while the fetch subprocess
    /// has not exited. Both sides matter: a job keeps doing fallback work
    /// after its primary subprocess has already exited.
    pub fn is_running(&self) -> bool {
        let child_running =
            self.has_child.load(Ordering::Acquire) && !self.child_exited.load(Ordering::Acquire);
        let worker_alive = self.worker.get().map_or(true, |handle| !handle.is_finished());
        child_running || worker_alive
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let outcome = self.outcome.lock().unwrap();
        let (ended_at, return_code, error, pid) = (
            outcome.ended_at,
            outcome.return_code,
            outcome.error.clone(),
            outcome.pid,
        );
        drop(outcome);
        JobSnapshot {
            repo_id: self.repo_id.clone(),
            target_dir: self.target_dir.clone(),
            revision: self.revision.clone(),
            started_at: self.started_at,
            ended_at,
            return_code,
            error,
            pid,
            log_file: self.log_file.clone(),
            running: self.is_running(),
        }
    }
}

/// Serializable view of a job, embedded in every status answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub repo_id: String,
    pub target_dir: PathBuf,
    pub revision: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
    pub error: Option<String>,
    pub pid: Option<u32>,
    pub log_file: PathBuf,
    pub running: bool,
}
