//!
//! Runtime lifecycle management for local inference backends.
//!
//! Turns a directory of on-disk model artifacts into addressable,
//! lazily-started local processes:
//! - Format detection picks the backend (gguf engine vs safetensors runner)
//! - The launcher walks typed command-line variants until one survives
//! - A TCP readiness probe promotes records from loading to ready
//! - The idle evictor unloads ready models nobody has touched

pub mod format_detector;
pub mod idle_evictor;
pub mod port_allocator;
pub mod process_launcher;
pub mod readiness;
pub mod state;
pub mod supervisor;

pub use format_detector::{FormatDetector, RuntimeKind};
pub use port_allocator::PortAllocator;
pub use process_launcher::{LaunchSpec, ProcessLauncher, LONG_SPELLING, SHORT_SPELLING};
pub use readiness::{ProbeOutcome, ReadinessProbe};
pub use state::{RuntimeRecord, RuntimeStatus};
pub use supervisor::{BackendAvailability, RuntimeSupervisor};
