//! TCP readiness probing for freshly launched backends.
//!
//! The probe deadline is soft: a backend still loading weights when it
//! elapses is left in `loading` and may become healthy under a later check.

use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::debug;

/// What the liveness callback reports about the child between connect
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildPoll {
    Running,
    Exited(Option<i32>),
    /// The record was detached (e.g. unloaded concurrently); stop probing.
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Timeout,
    EarlyExit { code: Option<i32> },
    Aborted,
}

pub struct ReadinessProbe {
    interval: Duration,
    connect_timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(interval: Duration) -> Self {
        Self { interval, connect_timeout: Duration::from_secs(1) }
    }

    /// Poll `host:port` until it accepts a connection, the child exits, or
    /// the deadline elapses. `poll_child` is consulted every iteration so an
    /// exited backend is reported with its return code instead of a timeout.
    pub async fn await_ready(
        &self,
        host: &str,
        port: u16,
        deadline: Duration,
        mut poll_child: impl FnMut() -> ChildPoll,
    ) -> ProbeOutcome {
        let started = Instant::now();
        loop {
            if Self::port_open(host, port, self.connect_timeout).await {
                debug!("Port {}:{} accepted a connection", host, port);
                return ProbeOutcome::Ready;
            }
            match poll_child() {
                ChildPoll::Exited(code) => return ProbeOutcome::EarlyExit { code },
                ChildPoll::Gone => return ProbeOutcome::Aborted,
                ChildPoll::Running => {}
            }
            if started.elapsed() >= deadline {
                return ProbeOutcome::Timeout;
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn port_open(host: &str, port: u16, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }
}
