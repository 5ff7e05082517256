//! Runtime state types: the per-model record and its table entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Child;
use std::time::Instant;

use super::format_detector::RuntimeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Stopped,
    Loading,
    Ready,
    Error,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Stopped => "stopped",
            RuntimeStatus::Loading => "loading",
            RuntimeStatus::Ready => "ready",
            RuntimeStatus::Error => "error",
        }
    }

    /// Loading and ready records own (or are acquiring) a live child process.
    pub fn is_active(&self) -> bool {
        matches!(self, RuntimeStatus::Loading | RuntimeStatus::Ready)
    }
}

/// Externally visible snapshot of one model's runtime state.
///
/// Invariant: `port` and `pid` are both present or both absent; they are
/// present only while a child process is believed alive. A record is never
/// deleted on unload; it reverts to `stopped` so the model's history (last
/// error, log location) stays queryable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeRecord {
    pub model: String,
    pub status: RuntimeStatus,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub kind: RuntimeKind,
    pub last_access: Option<DateTime<Utc>>,
    pub log_file: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl RuntimeRecord {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            status: RuntimeStatus::Stopped,
            port: None,
            pid: None,
            kind: RuntimeKind::Unknown,
            last_access: None,
            log_file: None,
            last_error: None,
        }
    }

    /// Clear process identity after a teardown or crash.
    pub fn clear_process(&mut self) {
        self.port = None;
        self.pid = None;
    }
}

/// Table entry: the serializable record plus in-process-only state (the
/// owned child handle and the monotonic access clock the evictor reads).
pub(crate) struct ModelEntry {
    pub record: RuntimeRecord,
    pub last_access: Option<Instant>,
    pub child: Option<Child>,
}

impl ModelEntry {
    pub fn new(model: &str) -> Self {
        Self {
            record: RuntimeRecord::new(model),
            last_access: None,
            child: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = Some(Instant::now());
        self.record.last_access = Some(Utc::now());
    }
}
