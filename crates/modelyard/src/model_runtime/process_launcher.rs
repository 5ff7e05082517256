//! Backend process launcher with command-variant fallback.
//!
//! Backend builds are not flag-compatible across versions: the same binary
//! name may want `--port` or `-p`. Each launch therefore walks an ordered
//! list of typed launch specs, accepting the first child that survives a
//! short grace window. Child stdout/stderr go to an append-only per-model
//! log bracketed by `# START` / `# EARLY_EXIT` markers so repeated attempts
//! stay reconstructible from one file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::LaunchError;

/// One spelling of the gguf backend's flag set.
#[derive(Debug, Clone, Copy)]
pub struct FlagSpelling {
    pub model: &'static str,
    pub port: &'static str,
    pub threads: &'static str,
    pub ctx: &'static str,
    pub gpu_layers: &'static str,
}

/// Current llama.cpp server spelling.
pub const LONG_SPELLING: FlagSpelling = FlagSpelling {
    model: "--model",
    port: "--port",
    threads: "--threads",
    ctx: "--ctx-size",
    gpu_layers: "--gpu-layers",
};

/// Legacy single-dash spelling still shipped by older builds.
pub const SHORT_SPELLING: FlagSpelling = FlagSpelling {
    model: "-m",
    port: "-p",
    threads: "-t",
    ctx: "-c",
    gpu_layers: "-ngl",
};

/// A fully rendered command line for one launch attempt.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// gguf backend invocation. The GPU hint is appended only when the VRAM
    /// tier produced a non-zero layer count.
    pub fn gguf(
        bin: &Path,
        model_file: &Path,
        port: u16,
        threads: u32,
        ctx_size: u32,
        gpu_layers: u32,
        spelling: FlagSpelling,
    ) -> Self {
        let mut args = vec![
            spelling.model.to_string(),
            model_file.to_string_lossy().into_owned(),
            spelling.port.to_string(),
            port.to_string(),
            spelling.threads.to_string(),
            threads.to_string(),
            spelling.ctx.to_string(),
            ctx_size.to_string(),
        ];
        if gpu_layers > 0 {
            args.push(spelling.gpu_layers.to_string());
            args.push(gpu_layers.to_string());
        }
        Self { program: bin.to_path_buf(), args }
    }

    /// Safetensors runner invocation. The runner has a single stable flag
    /// set and no GPU-layer knob (it picks its device itself).
    pub fn safetensors(runner: &Path, model_dir: &Path, port: u16) -> Self {
        Self {
            program: runner.to_path_buf(),
            args: vec![
                "--model".to_string(),
                model_dir.to_string_lossy().into_owned(),
                "--port".to_string(),
                port.to_string(),
                "--device".to_string(),
                "auto".to_string(),
            ],
        }
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Result of an accepted launch. The child handle is owned by the caller's
/// runtime record from here on.
#[derive(Debug)]
pub struct Launched {
    pub child: Child,
    pub pid: u32,
    pub command: String,
}

pub struct ProcessLauncher {
    grace: Duration,
}

impl ProcessLauncher {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Try each launch spec in order until one survives the grace window.
    pub async fn launch(&self, specs: &[LaunchSpec], log_path: &Path) -> Result<Launched, LaunchError> {
        let program = match specs.first() {
            Some(spec) => &spec.program,
            None => {
                return Err(LaunchError::SpawnFailed {
                    message: "no launch variants supplied".to_string(),
                    log: log_path.to_path_buf(),
                })
            }
        };
        if !program.exists() {
            return Err(LaunchError::BinNotFound { path: program.clone() });
        }

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LaunchError::SpawnFailed {
                message: format!("cannot create log directory: {}", e),
                log: log_path.to_path_buf(),
            })?;
        }

        for spec in specs {
            let mut log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .map_err(|e| LaunchError::SpawnFailed {
                    message: format!("cannot open log file: {}", e),
                    log: log_path.to_path_buf(),
                })?;
            let command = spec.command_line();
            let _ = writeln!(log, "# START {} cmd={}", chrono::Utc::now().to_rfc3339(), command);

            let stdout = log.try_clone().map_err(|e| LaunchError::SpawnFailed {
                message: format!("cannot clone log handle: {}", e),
                log: log_path.to_path_buf(),
            })?;
            let stderr = log.try_clone().map_err(|e| LaunchError::SpawnFailed {
                message: format!("cannot clone log handle: {}", e),
                log: log_path.to_path_buf(),
            })?;

            let mut child = match Command::new(&spec.program)
                .args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::from(stderr))
                .spawn()
            {
                Ok(child) => child,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(LaunchError::BinNotFound { path: spec.program.clone() })
                }
                Err(e) => {
                    return Err(LaunchError::SpawnFailed {
                        message: e.to_string(),
                        log: log_path.to_path_buf(),
                    })
                }
            };

            // Grace window: a variant whose flags the binary rejects dies
            // here, and the next spelling gets its turn.
            tokio::time::sleep(self.grace).await;

            match child.try_wait() {
                Ok(Some(status)) if !status.success() => {
                    let _ = writeln!(log, "# EARLY_EXIT rc={:?}", status.code());
                    warn!(
                        "Launch variant exited early (rc={:?}), trying next: {}",
                        status.code(),
                        command
                    );
                    continue;
                }
                _ => {}
            }

            let pid = child.id();
            info!("Backend accepted launch variant (pid {}): {}", pid, command);
            return Ok(Launched { child, pid, command });
        }

        Err(LaunchError::SpawnFailed {
            message: "no launch variant survived startup".to_string(),
            log: log_path.to_path_buf(),
        })
    }
}
