//! Download job manager: one background fetch job per model name.
//!
//! `start` spawns the hub CLI on a worker task and streams its combined
//! output into an append-only log. When the CLI is unavailable or exits
//! non-zero the worker falls back to a library-level snapshot fetch
//! restricted to serving-relevant file patterns. Errors never reach the
//! `start` caller (it has already returned); they surface through `status`.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::job::{DownloadJob, JobSnapshot};
use super::patterns;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "job", rename_all = "lowercase")]
pub enum StartOutcome {
    /// A worker was spawned for this job.
    Started(JobSnapshot),
    /// A job for this name is already running; its snapshot is returned and
    /// no new work is performed.
    Busy(JobSnapshot),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "job", rename_all = "lowercase")]
pub enum DownloadStatus {
    Absent,
    Running(JobSnapshot),
    Finished(JobSnapshot),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CancelOutcome {
    Noop,
    Cancelled { pid: Option<u32> },
    Error { message: String },
}

pub struct DownloadManager {
    jobs: DashMap<String, Arc<DownloadJob>>,
    cli_override: Option<PathBuf>,
}

impl DownloadManager {
    pub fn new() -> Self {
        Self { jobs: DashMap::new(), cli_override: None }
    }

    /// Manager with a pinned hub CLI path instead of a PATH lookup.
    pub fn with_cli(cli: impl Into<PathBuf>) -> Self {
        Self { jobs: DashMap::new(), cli_override: Some(cli.into()) }
    }

    /// Start a fetch job for `model_name`. Returns immediately; all fetch
    /// I/O happens on a background worker. A second start for a name with a
    /// running job returns `Busy` with the existing job's snapshot.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        model_name: &str,
        repo_id: &str,
        target_root: &Path,
        revision: Option<String>,
    ) -> anyhow::Result<StartOutcome> {
        let target_dir = target_root.join(model_name);
        std::fs::create_dir_all(&target_dir)?;
        let log_file = target_root.join(format!("download_{}.log", model_name));

        // Check-and-insert under the map entry lock: two concurrent starts
        // for the same name resolve to exactly one running job.
        let job = match self.jobs.entry(model_name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_running() {
                    info!("Download for {} already running; returning busy", model_name);
                    return Ok(StartOutcome::Busy(occupied.get().snapshot()));
                }
                let job = Arc::new(DownloadJob::new(repo_id, target_dir, revision, log_file));
                occupied.insert(Arc::clone(&job));
                job
            }
            Entry::Vacant(vacant) => {
                let job = Arc::new(DownloadJob::new(repo_id, target_dir, revision, log_file));
                vacant.insert(Arc::clone(&job));
                job
            }
        };

        let cli = self.resolve_cli();
        let token = hub_token();
        info!(
            "Starting download job for {} from {} (cli: {:?})",
            model_name, repo_id, cli
        );
        let worker = tokio::spawn(run_job(Arc::clone(&job), cli, token, model_name.to_string()));
        let _ = job.worker.set(worker);

        Ok(StartOutcome::Started(job.snapshot()))
    }

    pub fn status(&self, model_name: &str) -> DownloadStatus {
        match self.jobs.get(model_name) {
            None => DownloadStatus::Absent,
            Some(job) => {
                if job.is_running() {
                    DownloadStatus::Running(job.snapshot())
                } else {
                    DownloadStatus::Finished(job.snapshot())
                }
            }
        }
    }

    /// Force-terminate a running job's fetch subprocess. No-op when nothing
    /// is running. A job already past its subprocess and into the library
    /// fallback cannot be interrupted; that is reported as an error rather
    /// than silently claiming the kill worked.
    pub async fn cancel(&self, model_name: &str) -> CancelOutcome {
        let job = match self.jobs.get(model_name) {
            Some(job) => Arc::clone(&job),
            None => return CancelOutcome::Noop,
        };
        if !job.is_running() {
            return CancelOutcome::Noop;
        }

        let mut guard = job.child.lock().await;
        match guard.as_mut() {
            Some(child) => {
                let pid = child.id().or_else(|| job.outcome.lock().unwrap().pid);
                match child.start_kill() {
                    Ok(()) => {
                        info!("Cancelled download for {} (pid {:?})", model_name, pid);
                        CancelOutcome::Cancelled { pid }
                    }
                    Err(e) => CancelOutcome::Error { message: e.to_string() },
                }
            }
            None => CancelOutcome::Error {
                message: "no fetch subprocess to cancel; an in-flight library fetch cannot be interrupted"
                    .to_string(),
            },
        }
    }

    fn resolve_cli(&self) -> Option<PathBuf> {
        if let Some(cli) = &self.cli_override {
            return if cli.exists() { Some(cli.clone()) } else { None };
        }
        which::which("huggingface-cli")
            .or_else(|_| which::which("hf"))
            .ok()
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Credential forwarded to both the subprocess and the library fallback.
fn hub_token() -> Option<String> {
    std::env::var("HUGGINGFACE_HUB_TOKEN")
        .ok()
        .or_else(|| std::env::var("HF_TOKEN").ok())
}

async fn run_job(job: Arc<DownloadJob>, cli: Option<PathBuf>, token: Option<String>, model_name: String) {
    let mut log = match OpenOptions::new().create(true).append(true).open(&job.log_file) {
        Ok(file) => file,
        Err(e) => {
            error!("Cannot open download log {}: {}", job.log_file.display(), e);
            let mut outcome = job.outcome.lock().unwrap();
            outcome.return_code = Some(-1);
            outcome.error = Some(format!("log_error: {}", e));
            outcome.ended_at = Some(Utc::now());
            return;
        }
    };
    let _ = writeln!(
        log,
        "# START {} | repo={} | model={} | rev={}",
        Utc::now().to_rfc3339(),
        job.repo_id,
        model_name,
        job.revision.as_deref().unwrap_or("-")
    );

    let mut return_code: Option<i32> = None;
    let mut first_error: Option<String> = None;

    if let Some(cli) = &cli {
        match spawn_primary(&job, cli, token.as_deref(), &log).await {
            Ok(()) => {
                let code = wait_for_child(&job).await;
                job.child_exited.store(true, Ordering::Release);
                // A kill leaves no exit code; record the signal-style -9.
                return_code = Some(code.unwrap_or(-9));
                job.outcome.lock().unwrap().return_code = return_code;
            }
            Err(e) => {
                let _ = writeln!(log, "# primary spawn failed: {}", e);
                warn!("Hub CLI spawn failed for {}: {}", model_name, e);
                first_error = Some(format!("primary_error: {}", e));
                return_code = Some(-1);
            }
        }
    }

    // Fallback when the CLI was unavailable, failed to spawn, or exited
    // non-zero.
    if return_code != Some(0) {
        let _ = writeln!(log, "# Fallback: snapshot fetch via hf-hub");
        match fallback_snapshot(&job, token).await {
            Ok(fetched) => {
                let _ = writeln!(
                    log,
                    "# snapshot_fetch_ok: {} files -> {}",
                    fetched,
                    job.target_dir.display()
                );
                return_code = Some(0);
                first_error = None;
            }
            Err(e) => {
                let message = format!("fallback_error: {}", e);
                error!("Download fallback for {} failed: {}", model_name, message);
                if first_error.is_none() {
                    first_error = Some(message);
                    return_code = Some(-2);
                }
                // A recorded primary error stays the first error.
            }
        }
    }

    let ended_at = Utc::now();
    {
        let mut outcome = job.outcome.lock().unwrap();
        outcome.ended_at = Some(ended_at);
        outcome.return_code = return_code;
        outcome.error = first_error.clone();
    }
    let _ = writeln!(
        log,
        "# END {} rc={} err={}",
        ended_at.to_rfc3339(),
        return_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
        first_error.as_deref().unwrap_or("none")
    );
    info!("Download job for {} finished (rc={:?})", model_name, return_code);
}

/// Spawn the hub CLI with combined stdout/stderr appended to the job log,
/// so operators can tail real progress while the fetch runs.
async fn spawn_primary(
    job: &Arc<DownloadJob>,
    cli: &Path,
    token: Option<&str>,
    log: &std::fs::File,
) -> anyhow::Result<()> {
    let stdout = log.try_clone()?;
    let stderr = log.try_clone()?;

    let mut cmd = tokio::process::Command::new(cli);
    cmd.arg("download")
        .arg(&job.repo_id)
        .arg("--local-dir")
        .arg(&job.target_dir)
        .arg("--local-dir-use-symlinks")
        .arg("False");
    if let Some(rev) = &job.revision {
        cmd.arg("--revision").arg(rev);
    }
    if let Some(token) = token {
        cmd.env("HUGGINGFACE_HUB_TOKEN", token).env("HF_TOKEN", token);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    let child = cmd.spawn()?;
    job.outcome.lock().unwrap().pid = child.id();
    *job.child.lock().await = Some(child);
    job.has_child.store(true, Ordering::Release);
    Ok(())
}

/// Poll the shared child handle until exit. The handle lock is held only
/// briefly per poll so `cancel` can interleave its kill.
async fn wait_for_child(job: &Arc<DownloadJob>) -> Option<i32> {
    loop {
        {
            let mut guard = job.child.lock().await;
            match guard.as_mut() {
                Some(child) => match child.try_wait() {
                    Ok(Some(status)) => return status.code(),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Waiting on fetch subprocess failed: {}", e);
                        return None;
                    }
                },
                None => return None,
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Library-level snapshot fetch restricted to the allow/ignore patterns.
/// Files land in the job's target directory, copied out of the hub cache.
async fn fallback_snapshot(job: &Arc<DownloadJob>, token: Option<String>) -> anyhow::Result<usize> {
    use hf_hub::api::tokio::ApiBuilder;
    use hf_hub::{Repo, RepoType};

    let api = ApiBuilder::new().with_token(token).build()?;
    let repo = match &job.revision {
        Some(rev) => api.repo(Repo::with_revision(
            job.repo_id.clone(),
            RepoType::Model,
            rev.clone(),
        )),
        None => api.model(job.repo_id.clone()),
    };

    let info = repo.info().await?;
    let mut fetched = 0usize;
    for sibling in &info.siblings {
        if !patterns::is_wanted(&sibling.rfilename) {
            continue;
        }
        let cached = repo.get(&sibling.rfilename).await?;
        let dest = job.target_dir.join(&sibling.rfilename);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&cached, &dest).await?;
        fetched += 1;
    }
    anyhow::ensure!(fetched > 0, "no files matched the fetch patterns in {}", job.repo_id);
    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn fake_cli(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-hub-cli");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn wait_finished(manager: &DownloadManager, name: &str, secs: u64) -> JobSnapshot {
        for _ in 0..(secs * 10) {
            if let DownloadStatus::Finished(snap) = manager.status(name) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("download {} did not finish within {}s", name, secs);
    }

    #[tokio::test]
    async fn test_status_absent_without_job() {
        let manager = DownloadManager::new();
        assert!(matches!(manager.status("nope"), DownloadStatus::Absent));
    }

    #[tokio::test]
    async fn test_cancel_without_job_is_noop() {
        let manager = DownloadManager::new();
        assert!(matches!(manager.cancel("nope").await, CancelOutcome::Noop));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_primary_skips_fallback() {
        let root = TempDir::new().unwrap();
        let cli = fake_cli(root.path(), "echo fetching; exit 0");
        let manager = DownloadManager::with_cli(cli);

        let outcome = manager
            .start("m3", "acme/tiny-model", root.path(), None)
            .unwrap();
        assert!(matches!(outcome, StartOutcome::Started(_)));

        let snap = wait_finished(&manager, "m3", 10).await;
        assert_eq!(snap.return_code, Some(0));
        assert!(snap.error.is_none());
        assert!(snap.ended_at.is_some());
        assert!(!snap.running);

        let transcript = std::fs::read_to_string(&snap.log_file).unwrap();
        assert!(transcript.contains("# START"));
        assert!(transcript.contains("fetching"));
        assert!(transcript.contains("# END"));
        assert!(!transcript.contains("# Fallback"));

        // Completed job: cancel is a no-op.
        assert!(matches!(manager.cancel("m3").await, CancelOutcome::Noop));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_start_is_busy_with_same_job() {
        let root = TempDir::new().unwrap();
        let cli = fake_cli(root.path(), "sleep 30");
        let manager = DownloadManager::with_cli(cli);

        let first = manager
            .start("m3", "acme/tiny-model", root.path(), None)
            .unwrap();
        let second = manager
            .start("m3", "acme/tiny-model", root.path(), None)
            .unwrap();

        let first_snap = match first {
            StartOutcome::Started(snap) => snap,
            StartOutcome::Busy(_) => panic!("first start must not be busy"),
        };
        let second_snap = match second {
            StartOutcome::Busy(snap) => snap,
            StartOutcome::Started(_) => panic!("second start must be busy"),
        };
        // Same job identity, not a second worker.
        assert_eq!(first_snap.started_at, second_snap.started_at);

        // Give the worker a moment to spawn the subprocess before killing it.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(matches!(manager.status("m3"), DownloadStatus::Running(_)));
        let cancelled = manager.cancel("m3").await;
        assert!(matches!(cancelled, CancelOutcome::Cancelled { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_revision_is_forwarded_to_cli() {
        let root = TempDir::new().unwrap();
        // The fake CLI echoes its argv into the log.
        let cli = fake_cli(root.path(), "echo args: \"$@\"; exit 0");
        let manager = DownloadManager::with_cli(cli);

        manager
            .start("m4", "acme/tiny-model", root.path(), Some("v2".to_string()))
            .unwrap();
        let snap = wait_finished(&manager, "m4", 10).await;

        let transcript = std::fs::read_to_string(&snap.log_file).unwrap();
        assert!(transcript.contains("download acme/tiny-model"));
        assert!(transcript.contains("--revision v2"));
    }

    #[tokio::test]
    async fn test_unreachable_repo_falls_back_and_records_error() {
        let root = TempDir::new().unwrap();
        // Pinned CLI path that does not exist: the primary is unavailable
        // and the worker goes straight to the library fallback, which fails
        // against a repo id that cannot resolve.
        let manager = DownloadManager::with_cli(root.path().join("missing-cli"));

        manager
            .start("m3", "modelyard-tests/definitely-missing-repo", root.path(), None)
            .unwrap();
        let snap = wait_finished(&manager, "m3", 120).await;

        assert_ne!(snap.return_code, Some(0));
        assert_eq!(snap.return_code, Some(-2));
        assert!(snap.error.as_deref().unwrap().starts_with("fallback_error"));

        let transcript = std::fs::read_to_string(&snap.log_file).unwrap();
        assert!(transcript.contains("# Fallback"));
        assert!(transcript.contains("# END"));

        assert!(matches!(manager.cancel("m3").await, CancelOutcome::Noop));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_log_appends_across_attempts() {
        let root = TempDir::new().unwrap();
        let cli = fake_cli(root.path(), "exit 0");
        let manager = DownloadManager::with_cli(cli);

        manager.start("m5", "acme/tiny-model", root.path(), None).unwrap();
        let first = wait_finished(&manager, "m5", 10).await;

        manager.start("m5", "acme/tiny-model", root.path(), None).unwrap();
        let second = wait_finished(&manager, "m5", 10).await;

        assert_eq!(first.log_file, second.log_file);
        let transcript = std::fs::read_to_string(&second.log_file).unwrap();
        assert_eq!(transcript.matches("# START").count(), 2);
        assert_eq!(transcript.matches("# END").count(), 2);
    }
}
