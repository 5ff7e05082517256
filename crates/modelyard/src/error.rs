//! Error taxonomy for the runtime supervisor.
//!
//! Every variant carries enough structured detail (reason, relevant path,
//! log location) for an operator to self-diagnose from the error alone.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned synchronously by `RuntimeSupervisor::load`.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No `*.gguf`, `*.safetensors` or `*.bin` files in the artifact directory.
    /// The runtime table is left untouched.
    #[error("no supported model artifacts (*.gguf, *.safetensors, *.bin) under {}", dir.display())]
    UnsupportedFormat { dir: PathBuf },

    /// The backend binary for the detected format is not installed.
    #[error("backend binary not found at {}; install it there or set the path in the environment", expected.display())]
    RuntimeMissing { expected: PathBuf },

    /// Every port in the configured range is taken. Transient; retry after
    /// unloading a model.
    #[error("no free TCP port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Errors from the process launcher and startup probe.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("backend binary not found at {}", path.display())]
    BinNotFound { path: PathBuf },

    #[error("failed to spawn backend: {message} (log: {})", log.display())]
    SpawnFailed { message: String, log: PathBuf },

    /// The child exited while we were still waiting for its port to open.
    #[error("backend exited during startup with code {code:?} (log: {})", log.display())]
    EarlyExit { code: Option<i32>, log: PathBuf },
}

impl LoadError {
    /// Stable reason code for API payloads and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            LoadError::UnsupportedFormat { .. } => "unsupported_format",
            LoadError::RuntimeMissing { .. } => "runtime_missing",
            LoadError::NoFreePort { .. } => "no_free_port",
            LoadError::Launch(LaunchError::BinNotFound { .. }) => "bin_not_found",
            LoadError::Launch(LaunchError::SpawnFailed { .. }) => "spawn_failed",
            LoadError::Launch(LaunchError::EarlyExit { .. }) => "early_exit",
        }
    }
}
