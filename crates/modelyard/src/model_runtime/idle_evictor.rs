//! Background idle eviction.
//!
//! One long-lived loop per process: every check interval it unloads the
//! ready models whose idle clock has passed the timeout. A failure while
//! evicting one model never takes the loop down for the others.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::supervisor::RuntimeSupervisor;

pub(crate) fn spawn(supervisor: Arc<RuntimeSupervisor>) -> JoinHandle<()> {
    let interval = Duration::from_secs(supervisor.config().idle_check_interval_secs);
    let idle_timeout = Duration::from_secs(supervisor.config().idle_timeout_secs);

    tokio::spawn(async move {
        info!(
            "Idle evictor started (timeout {}s, check interval {}s)",
            idle_timeout.as_secs(),
            interval.as_secs()
        );
        loop {
            tokio::time::sleep(interval).await;
            for model in supervisor.idle_candidates(idle_timeout) {
                info!("Idle timeout reached for {}; unloading", model);
                let record = supervisor.unload(&model).await;
                debug!("Evicted {} -> {}", model, record.status.as_str());
            }
        }
    })
}
