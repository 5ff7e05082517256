// modelyard/crates/modelyard/src/lib.rs

pub mod config;
pub mod error;
pub mod hub_download;
pub mod model_runtime;
pub mod state_db;
pub mod system_probe;
pub mod telemetry;

// Public API exports
pub use config::Config;
pub use error::{LaunchError, LoadError};
pub use hub_download::{CancelOutcome, DownloadManager, DownloadStatus, JobSnapshot, StartOutcome};
pub use model_runtime::{
    BackendAvailability, RuntimeKind, RuntimeRecord, RuntimeStatus, RuntimeSupervisor,
};
pub use state_db::StateSink;
pub use system_probe::{detect_system_info, SystemInfo};
