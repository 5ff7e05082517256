// modelyard/crates/modelyard/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Supervisor configuration, read once at startup from the environment.
///
/// Every timing constant the supervisor uses is a default here rather than a
/// hardcoded value: the idle-eviction clock, the readiness deadline, the
/// launch grace window and the port scan range all come from this struct.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory that holds one subdirectory per model.
    pub models_root: PathBuf,
    /// Directory where backend binaries are installed (`llama-server`,
    /// `transformers-runner`). Used when no explicit binary path is set.
    pub backends_dir: PathBuf,
    /// Explicit path to the llama.cpp HTTP server binary, if set.
    pub llama_bin: Option<PathBuf>,
    /// Explicit path to the safetensors runner, if set.
    pub runner_bin: Option<PathBuf>,
    /// Host the backends bind and the prober connects to.
    pub backend_host: String,
    /// Inclusive TCP port scan range handed to backends.
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Worker threads passed to the gguf backend.
    pub threads: u32,
    /// Context size passed to the gguf backend.
    pub ctx_size: u32,
    /// How long a freshly spawned backend gets before an exit counts as an
    /// early exit and the next command variant is tried.
    pub launch_grace_ms: u64,
    /// Deadline for the TCP readiness probe.
    pub ready_timeout_secs: u64,
    /// Interval between readiness probe attempts.
    pub probe_interval_ms: u64,
    /// A `ready` model untouched for this long is unloaded by the evictor.
    pub idle_timeout_secs: u64,
    /// How often the idle evictor wakes up.
    pub idle_check_interval_secs: u64,
    /// How long `unload` waits for a killed child to be reaped before
    /// logging a kill timeout.
    pub kill_grace_ms: u64,
    /// Directory for per-model runtime logs.
    pub logs_dir: PathBuf,
    /// Optional SQLite file that mirrors every runtime status transition.
    pub state_db: Option<PathBuf>,
    /// Explicit hub CLI path; otherwise resolved from PATH.
    pub hub_cli: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        // Auto-detect threads if set to "auto"
        let threads = if env::var("THREADS").unwrap_or_else(|_| "auto".into()) == "auto" {
            Self::auto_detect_threads()
        } else {
            env::var("THREADS").unwrap_or_else(|_| "4".into()).parse().unwrap_or(4)
        };

        Ok(Self {
            models_root: PathBuf::from(env::var("MODELS_ROOT").unwrap_or_else(|_| "./models".into())),
            backends_dir: PathBuf::from(env::var("BACKENDS_DIR").unwrap_or_else(|_| "./backends".into())),
            llama_bin: env::var("LLAMA_BIN").ok().map(PathBuf::from),
            runner_bin: env::var("RUNNER_BIN").ok().map(PathBuf::from),
            backend_host: env::var("BACKEND_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port_range_start: env::var("PORT_RANGE_START")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .context("PORT_RANGE_START must be a port number")?,
            port_range_end: env::var("PORT_RANGE_END")
                .unwrap_or_else(|_| "8100".into())
                .parse()
                .context("PORT_RANGE_END must be a port number")?,
            threads,
            ctx_size: env::var("LLAMA_CTX").unwrap_or_else(|_| "2048".into()).parse().unwrap_or(2048),
            launch_grace_ms: env::var("LAUNCH_GRACE_MS")
                .unwrap_or_else(|_| "800".into())
                .parse()?,
            ready_timeout_secs: env::var("READY_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "20".into())
                .parse()?,
            probe_interval_ms: env::var("PROBE_INTERVAL_MS")
                .unwrap_or_else(|_| "500".into())
                .parse()?,
            idle_timeout_secs: env::var("IDLE_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "600".into())
                .parse()?,
            idle_check_interval_secs: env::var("IDLE_CHECK_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            kill_grace_ms: env::var("KILL_GRACE_MS")
                .unwrap_or_else(|_| "2000".into())
                .parse()?,
            logs_dir: PathBuf::from(env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".into())),
            state_db: env::var("STATE_DB").ok().map(PathBuf::from),
            hub_cli: env::var("HF_CLI_BIN").ok().map(PathBuf::from),
        })
    }

    fn auto_detect_threads() -> u32 {
        let num_cpus = num_cpus::get() as u32;
        info!("Auto-detected CPU cores: {}", num_cpus);

        match num_cpus {
            1..=2 => 1,
            3..=4 => (num_cpus * 2) / 3,
            5..=8 => (num_cpus * 3) / 5,
            9..=16 => num_cpus / 2,
            _ => 8,
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Models Root: {}", self.models_root.display());
        info!("- Backends Dir: {}", self.backends_dir.display());
        info!("- Backend Host: {}", self.backend_host);
        info!("- Port Range: {}-{}", self.port_range_start, self.port_range_end);
        info!("- Threads: {}", self.threads);
        info!("- Context Size: {}", self.ctx_size);
        info!("- Ready Timeout: {}s", self.ready_timeout_secs);
        info!("- Idle Timeout: {}s", self.idle_timeout_secs);
        info!("- Idle Check Interval: {}s", self.idle_check_interval_secs);
        info!("- Logs Dir: {}", self.logs_dir.display());
        if let Some(db) = &self.state_db {
            info!("- State DB: {}", db.display());
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models_root: PathBuf::from("./models"),
            backends_dir: PathBuf::from("./backends"),
            llama_bin: None,
            runner_bin: None,
            backend_host: "127.0.0.1".to_string(),
            port_range_start: 8080,
            port_range_end: 8100,
            threads: 4,
            ctx_size: 2048,
            launch_grace_ms: 800,
            ready_timeout_secs: 20,
            probe_interval_ms: 500,
            idle_timeout_secs: 600,
            idle_check_interval_secs: 30,
            kill_grace_ms: 2000,
            logs_dir: PathBuf::from("./logs"),
            state_db: None,
            hub_cli: None,
        }
    }
}
