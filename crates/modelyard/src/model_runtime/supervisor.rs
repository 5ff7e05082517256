//! Runtime lifecycle supervisor.
//!
//! Composes format detection, port allocation, process launch and readiness
//! probing into `load`/`unload`/`status`/`mark_access`, and owns the runtime
//! table every other component reads. All state transitions for a model
//! happen under the table lock, so per-name transitions are strictly
//! sequential while different models load and unload concurrently.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{LaunchError, LoadError};
use crate::state_db::StateSink;
use crate::system_probe;

use super::format_detector::{FormatDetector, RuntimeKind};
use super::port_allocator::PortAllocator;
use super::process_launcher::{LaunchSpec, ProcessLauncher, LONG_SPELLING, SHORT_SPELLING};
use super::readiness::{ChildPoll, ProbeOutcome, ReadinessProbe};
use super::state::{ModelEntry, RuntimeRecord, RuntimeStatus};

/// Operator-facing report on whether a backend binary is installed.
#[derive(Debug, Clone, Serialize)]
pub struct BackendAvailability {
    pub exists: bool,
    pub path: PathBuf,
    pub message: Option<String>,
}

pub struct RuntimeSupervisor {
    config: Config,
    table: Mutex<BTreeMap<String, ModelEntry>>,
    sink: Option<StateSink>,
    evictor_started: AtomicBool,
    vram_mb: u64,
}

impl RuntimeSupervisor {
    pub fn new(config: Config) -> Self {
        Self::build(config, None)
    }

    /// Supervisor that mirrors every status transition to a SQLite sink.
    /// The sink is a write-only observer; the in-memory table stays
    /// authoritative.
    pub fn with_sink(config: Config, sink: StateSink) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(config: Config, sink: Option<StateSink>) -> Self {
        let vram_mb = system_probe::detect_vram_mb();
        Self {
            config,
            table: Mutex::new(BTreeMap::new()),
            sink,
            evictor_started: AtomicBool::new(false),
            vram_mb,
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Load a model: detect its artifact format, launch the matching
    /// backend, and wait for its port to open. Blocks the caller for up to
    /// the probe deadline. A model that is already `loading` or `ready`
    /// short-circuits to its existing record instead of double-launching.
    pub async fn load(
        &self,
        model_name: &str,
        artifact_dir: &Path,
        threads: Option<u32>,
    ) -> Result<RuntimeRecord, LoadError> {
        let kind = FormatDetector::detect_dir(artifact_dir);
        if kind == RuntimeKind::Unknown {
            return Err(LoadError::UnsupportedFormat { dir: artifact_dir.to_path_buf() });
        }
        let artifact = FormatDetector::artifact_path(artifact_dir, kind)
            .ok_or_else(|| LoadError::UnsupportedFormat { dir: artifact_dir.to_path_buf() })?;
        let bin = self.resolve_backend(kind)?;

        let threads = threads.unwrap_or(self.config.threads);
        let gpu_layers = match kind {
            RuntimeKind::Gguf => system_probe::gpu_layers_for_vram(self.vram_mb),
            _ => 0,
        };
        let log_path = self.config.logs_dir.join(format!("runtime_{}.log", model_name));

        // Double-load guard, port pick and record reservation under one
        // lock: concurrent loads for the same name serialize here, and two
        // concurrent loads for different names cannot scan onto the same
        // port.
        let mut port = {
            let mut table = self.table.lock().unwrap();
            if let Some(entry) = table.get(model_name) {
                if entry.record.status.is_active() {
                    info!(
                        "Model {} is already {}; returning existing record",
                        model_name,
                        entry.record.status.as_str()
                    );
                    return Ok(entry.record.clone());
                }
            }
            let port = self
                .allocator()
                .allocate()
                .ok_or(LoadError::NoFreePort {
                    start: self.config.port_range_start,
                    end: self.config.port_range_end,
                })?;

            let entry = table
                .entry(model_name.to_string())
                .or_insert_with(|| ModelEntry::new(model_name));
            entry.record.status = RuntimeStatus::Loading;
            entry.record.kind = kind;
            entry.record.log_file = Some(log_path.clone());
            entry.record.last_error = None;
            entry.record.clear_process();
            entry.touch();
            port
        };
        self.mirror(model_name, RuntimeStatus::Loading, None, None);

        // Launch; the port reservation is non-atomic, so a launch where no
        // variant survives the grace window is retried once on a fresh port
        // in case the first was stolen between bind check and spawn.
        let launcher = ProcessLauncher::new(Duration::from_millis(self.config.launch_grace_ms));
        let mut attempt = 0;
        let launched = loop {
            let specs = self.launch_specs(kind, &bin, &artifact, port, threads, gpu_layers);
            match launcher.launch(&specs, &log_path).await {
                Ok(launched) => break launched,
                Err(err @ LaunchError::SpawnFailed { .. }) if attempt == 0 => {
                    attempt += 1;
                    let reallocated = {
                        let _table = self.table.lock().unwrap();
                        self.allocator().allocate()
                    };
                    match reallocated {
                        Some(fresh) => {
                            warn!(
                                "Launch failed on port {} ({}); retrying once on port {}",
                                port, err, fresh
                            );
                            port = fresh;
                        }
                        None => {
                            self.fail_load(model_name, &err.to_string());
                            return Err(err.into());
                        }
                    }
                }
                Err(err) => {
                    self.fail_load(model_name, &err.to_string());
                    return Err(err.into());
                }
            }
        };

        let pid = launched.pid;
        {
            let mut table = self.table.lock().unwrap();
            let entry = table
                .entry(model_name.to_string())
                .or_insert_with(|| ModelEntry::new(model_name));
            entry.record.status = RuntimeStatus::Loading;
            entry.record.port = Some(port);
            entry.record.pid = Some(pid);
            entry.child = Some(launched.child);
            entry.touch();
        }
        self.mirror(model_name, RuntimeStatus::Loading, Some(port), Some(pid));
        info!(
            "Launched {} backend for {} on port {} (pid {}): {}",
            kind.name(),
            model_name,
            port,
            pid,
            launched.command
        );

        let probe = ReadinessProbe::new(Duration::from_millis(self.config.probe_interval_ms));
        let outcome = probe
            .await_ready(
                &self.config.backend_host,
                port,
                Duration::from_secs(self.config.ready_timeout_secs),
                || {
                    let mut table = self.table.lock().unwrap();
                    match table.get_mut(model_name).and_then(|e| e.child.as_mut()) {
                        None => ChildPoll::Gone,
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => ChildPoll::Exited(status.code()),
                            _ => ChildPoll::Running,
                        },
                    }
                },
            )
            .await;

        match outcome {
            ProbeOutcome::Ready => {
                let mut table = self.table.lock().unwrap();
                if let Some(entry) = table.get_mut(model_name) {
                    // Only promote a record that is still ours; a concurrent
                    // unload wins.
                    if entry.record.status == RuntimeStatus::Loading {
                        entry.record.status = RuntimeStatus::Ready;
                        entry.touch();
                    }
                }
                drop(table);
                self.mirror(model_name, RuntimeStatus::Ready, Some(port), Some(pid));
                info!("Model {} is ready on port {}", model_name, port);
            }
            ProbeOutcome::Timeout => {
                // Soft failure: big models keep loading weights past the
                // deadline, so the record stays `loading` for a later check.
                warn!(
                    "Model {} did not open port {} within {}s; leaving status loading",
                    model_name, port, self.config.ready_timeout_secs
                );
            }
            ProbeOutcome::EarlyExit { code } => {
                let err = LaunchError::EarlyExit { code, log: log_path.clone() };
                self.fail_load(model_name, &err.to_string());
                return Err(err.into());
            }
            ProbeOutcome::Aborted => {
                info!("Model {} was unloaded while still loading", model_name);
            }
        }

        let table = self.table.lock().unwrap();
        Ok(table
            .get(model_name)
            .map(|e| e.record.clone())
            .unwrap_or_else(|| RuntimeRecord::new(model_name)))
    }

    /// Tear down a model's backend. With no child on record this is a no-op
    /// that still forces `stopped`. The kill is best-effort: the record is
    /// marked stopped first, then the child is killed and reaped with a
    /// bounded verify.
    pub async fn unload(&self, model_name: &str) -> RuntimeRecord {
        let (child, pid, snapshot) = {
            let mut table = self.table.lock().unwrap();
            let entry = table
                .entry(model_name.to_string())
                .or_insert_with(|| ModelEntry::new(model_name));
            let child = entry.child.take();
            let pid = entry.record.pid;
            entry.record.status = RuntimeStatus::Stopped;
            entry.record.clear_process();
            (child, pid, entry.record.clone())
        };
        self.mirror(model_name, RuntimeStatus::Stopped, None, None);

        match child {
            None => {
                info!("Unload {}: no child process on record", model_name);
            }
            Some(mut child) => {
                info!("Unloading {} (pid {:?})", model_name, pid);
                if let Err(e) = child.kill() {
                    warn!("Failed to kill backend for {}: {}", model_name, e);
                }
                let deadline = Instant::now() + Duration::from_millis(self.config.kill_grace_ms);
                let mut reaped = false;
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            debug!("Backend for {} exited with {:?}", model_name, status.code());
                            reaped = true;
                            break;
                        }
                        Ok(None) => {
                            if Instant::now() >= deadline {
                                break;
                            }
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        Err(e) => {
                            warn!("Failed to reap backend for {}: {}", model_name, e);
                            break;
                        }
                    }
                }
                if !reaped {
                    warn!(
                        "Kill timeout: backend for {} (pid {:?}) still running after {}ms",
                        model_name, pid, self.config.kill_grace_ms
                    );
                }
            }
        }
        snapshot
    }

    /// Snapshot of every record, sorted by model name.
    pub fn status(&self) -> Vec<RuntimeRecord> {
        let table = self.table.lock().unwrap();
        table.values().map(|e| e.record.clone()).collect()
    }

    /// Refresh a model's idle clock. Called on every proxied inference
    /// request. Unknown names are ignored and create no record.
    pub fn mark_access(&self, model_name: &str) {
        let mut table = self.table.lock().unwrap();
        if let Some(entry) = table.get_mut(model_name) {
            entry.touch();
        }
    }

    /// Unload every `loading`/`ready` model. The only path that guarantees
    /// no orphaned children survive an orderly shutdown.
    pub async fn stop_all(&self) {
        let active: Vec<String> = {
            let table = self.table.lock().unwrap();
            table
                .iter()
                .filter(|(_, e)| e.record.status.is_active())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in active {
            info!("Shutdown: unloading {}", name);
            self.unload(&name).await;
        }
    }

    /// Start the background idle evictor. Idempotent: the first call spawns
    /// the loop and returns true, later calls are no-ops.
    pub fn start_idle_evictor(self: &Arc<Self>) -> bool {
        if self.evictor_started.swap(true, Ordering::SeqCst) {
            return false;
        }
        super::idle_evictor::spawn(Arc::clone(self));
        true
    }

    /// Ready models whose idle clock has passed the timeout.
    pub(crate) fn idle_candidates(&self, idle_timeout: Duration) -> Vec<String> {
        let table = self.table.lock().unwrap();
        table
            .iter()
            .filter(|(_, e)| {
                e.record.status == RuntimeStatus::Ready
                    && e.last_access.map(|t| t.elapsed() >= idle_timeout).unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Report whether the backend binary for a format is installed.
    pub fn check_backend(&self, kind: RuntimeKind) -> BackendAvailability {
        match self.resolve_backend(kind) {
            Ok(path) => BackendAvailability { exists: true, path, message: None },
            Err(LoadError::RuntimeMissing { expected }) => BackendAvailability {
                exists: false,
                path: expected,
                message: Some("backend binary not found; install it at the path above".to_string()),
            },
            Err(_) => BackendAvailability {
                exists: false,
                path: self.config.backends_dir.clone(),
                message: Some("unsupported artifact format".to_string()),
            },
        }
    }

    fn allocator(&self) -> PortAllocator {
        PortAllocator::new(
            self.config.backend_host.clone(),
            self.config.port_range_start,
            self.config.port_range_end,
        )
    }

    /// Resolve the backend binary for a format. Prefers the explicit config
    /// path, then the current binary name under the backends directory, then
    /// the legacy spelling.
    fn resolve_backend(&self, kind: RuntimeKind) -> Result<PathBuf, LoadError> {
        match kind {
            RuntimeKind::Gguf => {
                if let Some(bin) = &self.config.llama_bin {
                    return if bin.exists() {
                        Ok(bin.clone())
                    } else {
                        Err(LoadError::RuntimeMissing { expected: bin.clone() })
                    };
                }
                let preferred = self.config.backends_dir.join(exe_name("llama-server"));
                if preferred.exists() {
                    return Ok(preferred);
                }
                let legacy = self.config.backends_dir.join(exe_name("server"));
                if legacy.exists() {
                    return Ok(legacy);
                }
                Err(LoadError::RuntimeMissing { expected: preferred })
            }
            RuntimeKind::Safetensors => {
                if let Some(bin) = &self.config.runner_bin {
                    return if bin.exists() {
                        Ok(bin.clone())
                    } else {
                        Err(LoadError::RuntimeMissing { expected: bin.clone() })
                    };
                }
                let expected = self.config.backends_dir.join(exe_name("transformers-runner"));
                if expected.exists() {
                    Ok(expected)
                } else {
                    Err(LoadError::RuntimeMissing { expected })
                }
            }
            RuntimeKind::Unknown => {
                Err(LoadError::UnsupportedFormat { dir: self.config.models_root.clone() })
            }
        }
    }

    fn launch_specs(
        &self,
        kind: RuntimeKind,
        bin: &Path,
        artifact: &Path,
        port: u16,
        threads: u32,
        gpu_layers: u32,
    ) -> Vec<LaunchSpec> {
        match kind {
            RuntimeKind::Gguf => vec![
                LaunchSpec::gguf(bin, artifact, port, threads, self.config.ctx_size, gpu_layers, LONG_SPELLING),
                LaunchSpec::gguf(bin, artifact, port, threads, self.config.ctx_size, gpu_layers, SHORT_SPELLING),
            ],
            RuntimeKind::Safetensors => vec![LaunchSpec::safetensors(bin, artifact, port)],
            RuntimeKind::Unknown => Vec::new(),
        }
    }

    /// Mark a failed load. The record is kept (status `error`, process
    /// identity cleared) so operators can inspect `status()` and the log.
    fn fail_load(&self, model_name: &str, message: &str) {
        {
            let mut table = self.table.lock().unwrap();
            if let Some(entry) = table.get_mut(model_name) {
                entry.record.status = RuntimeStatus::Error;
                entry.record.last_error = Some(message.to_string());
                entry.record.clear_process();
                entry.child = None;
            }
        }
        self.mirror(model_name, RuntimeStatus::Error, None, None);
    }

    fn mirror(&self, model: &str, status: RuntimeStatus, port: Option<u16>, pid: Option<u32>) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.upsert(model, status.as_str(), port, pid) {
                warn!("State sink update failed for {}: {}", model, e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_ready_for_tests(&self, model_name: &str, idle_for: Duration) {
        let mut table = self.table.lock().unwrap();
        let entry = table
            .entry(model_name.to_string())
            .or_insert_with(|| ModelEntry::new(model_name));
        entry.record.status = RuntimeStatus::Ready;
        entry.record.port = Some(9999);
        entry.record.pid = Some(1);
        entry.last_access = Instant::now().checked_sub(idle_for);
        entry.record.last_access = Some(chrono::Utc::now());
    }
}

fn exe_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    /// Config pointing every path into a temp dir, with timings scaled down
    /// so tests run in a couple of seconds.
    fn test_config(root: &TempDir) -> Config {
        Config {
            models_root: root.path().join("models"),
            backends_dir: root.path().join("backends"),
            logs_dir: root.path().join("logs"),
            port_range_start: 24100,
            port_range_end: 24140,
            threads: 2,
            launch_grace_ms: 100,
            ready_timeout_secs: 1,
            probe_interval_ms: 100,
            kill_grace_ms: 1000,
            ..Config::default()
        }
    }

    #[cfg(unix)]
    fn install_backend(root: &TempDir, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let dir = root.path().join("backends");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn gguf_model_dir(root: &TempDir, name: &str) -> std::path::PathBuf {
        let dir = root.path().join("models").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        File::create(dir.join("model.gguf")).unwrap();
        dir
    }

    // ===== Format & Backend Resolution Tests =====

    #[tokio::test]
    async fn test_load_empty_dir_is_unsupported_and_leaves_no_record() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));

        let empty = root.path().join("models").join("m2");
        std::fs::create_dir_all(&empty).unwrap();

        let err = supervisor.load("m2", &empty, None).await.unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat { .. }));
        assert!(supervisor.status().is_empty());
    }

    #[tokio::test]
    async fn test_load_without_backend_is_runtime_missing() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        let dir = gguf_model_dir(&root, "m1");

        let err = supervisor.load("m1", &dir, None).await.unwrap_err();
        match err {
            LoadError::RuntimeMissing { expected } => {
                assert!(expected.to_string_lossy().contains("llama-server"));
            }
            other => panic!("expected RuntimeMissing, got {:?}", other),
        }
        assert!(supervisor.status().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_backend_reports_missing_then_installed() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));

        let report = supervisor.check_backend(RuntimeKind::Gguf);
        assert!(!report.exists);
        assert!(report.message.is_some());

        install_backend(&root, "llama-server", "sleep 30");
        let report = supervisor.check_backend(RuntimeKind::Gguf);
        assert!(report.exists);
        assert!(report.message.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_legacy_backend_spelling_is_found() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        install_backend(&root, "server", "sleep 30");

        let report = supervisor.check_backend(RuntimeKind::Gguf);
        assert!(report.exists);
        assert!(report.path.to_string_lossy().ends_with("server"));
    }

    // ===== Load / Unload Lifecycle Tests =====

    #[cfg(unix)]
    #[tokio::test]
    async fn test_load_slow_backend_stays_loading_with_process_identity() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        install_backend(&root, "llama-server", "sleep 30");
        let dir = gguf_model_dir(&root, "m1");

        // The fake backend never opens its port, so the probe deadline
        // elapses and the record is left loading (the soft-timeout path).
        let record = supervisor.load("m1", &dir, None).await.unwrap();
        assert_eq!(record.status, RuntimeStatus::Loading);
        assert!(record.port.is_some());
        assert!(record.pid.is_some());

        let snapshot = supervisor.status();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].model, "m1");
        assert_eq!(snapshot[0].port, record.port);

        supervisor.unload("m1").await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_double_load_returns_existing_record() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        install_backend(&root, "llama-server", "sleep 30");
        let dir = gguf_model_dir(&root, "m1");

        let first = supervisor.load("m1", &dir, None).await.unwrap();
        let second = supervisor.load("m1", &dir, None).await.unwrap();

        assert_eq!(first.pid, second.pid);
        assert_eq!(first.port, second.port);
        // Exactly one record, i.e. no duplicate process was spawned.
        assert_eq!(supervisor.status().len(), 1);

        supervisor.unload("m1").await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unload_stops_record_and_frees_port() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        install_backend(&root, "llama-server", "sleep 30");
        let dir = gguf_model_dir(&root, "m1");

        let record = supervisor.load("m1", &dir, None).await.unwrap();
        let port = record.port.unwrap();

        let after = supervisor.unload("m1").await;
        assert_eq!(after.status, RuntimeStatus::Stopped);
        assert!(after.port.is_none());
        assert!(after.pid.is_none());

        // The child is dead, so its port accepts a fresh exclusive bind.
        let rebound = std::net::TcpListener::bind(("127.0.0.1", port));
        assert!(rebound.is_ok());

        // The record survives unload for history queries.
        let snapshot = supervisor.status();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, RuntimeStatus::Stopped);
    }

    #[tokio::test]
    async fn test_unload_unknown_model_is_noop_stop() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));

        let record = supervisor.unload("ghost").await;
        assert_eq!(record.status, RuntimeStatus::Stopped);
        assert!(record.port.is_none());
        assert!(record.pid.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_backend_crash_during_probe_is_early_exit() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        // Survives the 100ms grace window, then dies before opening a port.
        install_backend(&root, "llama-server", "sleep 0.4\nexit 2");
        let dir = gguf_model_dir(&root, "m1");

        let err = supervisor.load("m1", &dir, None).await.unwrap_err();
        assert_eq!(err.reason(), "early_exit");

        let snapshot = supervisor.status();
        assert_eq!(snapshot[0].status, RuntimeStatus::Error);
        assert!(snapshot[0].last_error.as_deref().unwrap().contains("2"));
        assert!(snapshot[0].port.is_none());
        assert!(snapshot[0].pid.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_free_port_leaves_store_unchanged() {
        let root = TempDir::new().unwrap();
        let mut config = test_config(&root);
        // One-port range, pinned by the test.
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let taken = holder.local_addr().unwrap().port();
        config.port_range_start = taken;
        config.port_range_end = taken;

        let supervisor = RuntimeSupervisor::new(config);
        install_backend(&root, "llama-server", "sleep 30");
        let dir = gguf_model_dir(&root, "m1");

        let err = supervisor.load("m1", &dir, None).await.unwrap_err();
        assert!(matches!(err, LoadError::NoFreePort { .. }));
        assert!(supervisor.status().is_empty());
    }

    // ===== Access Tracking & Snapshot Tests =====

    #[tokio::test]
    async fn test_mark_access_unknown_name_creates_no_record() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));

        supervisor.mark_access("ghost");
        assert!(supervisor.status().is_empty());
    }

    #[tokio::test]
    async fn test_status_is_idempotent_and_sorted() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        supervisor.force_ready_for_tests("zebra", Duration::from_secs(0));
        supervisor.force_ready_for_tests("alpha", Duration::from_secs(0));

        let first = supervisor.status();
        let second = supervisor.status();
        assert_eq!(first, second);
        assert_eq!(first[0].model, "alpha");
        assert_eq!(first[1].model, "zebra");
    }

    // ===== Shutdown Tests =====

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_all_unloads_every_active_model() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        install_backend(&root, "llama-server", "sleep 30");
        let dir_a = gguf_model_dir(&root, "m1");
        let dir_b = gguf_model_dir(&root, "m2");

        supervisor.load("m1", &dir_a, None).await.unwrap();
        supervisor.load("m2", &dir_b, None).await.unwrap();

        supervisor.stop_all().await;
        for record in supervisor.status() {
            assert_eq!(record.status, RuntimeStatus::Stopped);
            assert!(record.port.is_none());
        }
    }

    // ===== Idle Candidate Tests =====

    #[tokio::test]
    async fn test_idle_candidates_only_past_timeout() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        supervisor.force_ready_for_tests("stale", Duration::from_secs(700));
        supervisor.force_ready_for_tests("fresh", Duration::from_secs(1));

        let idle = supervisor.idle_candidates(Duration::from_secs(600));
        assert_eq!(idle, vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn test_loading_models_are_never_idle_candidates() {
        let root = TempDir::new().unwrap();
        let supervisor = RuntimeSupervisor::new(test_config(&root));
        supervisor.force_ready_for_tests("stale", Duration::from_secs(700));
        // Downgrade to loading: a model mid-load is never evicted.
        {
            let mut table = supervisor.table.lock().unwrap();
            table.get_mut("stale").unwrap().record.status = RuntimeStatus::Loading;
        }

        assert!(supervisor.idle_candidates(Duration::from_secs(600)).is_empty());
    }
}
