//! TCP port allocation by bind scan.
//!
//! The reservation is not atomic: the listener is dropped before the backend
//! binds, so another process can steal the port in between. The scan range is
//! private to this host and small, and the launcher retries on a fresh port
//! when a backend dies inside the grace window.

use std::net::TcpListener;
use tracing::debug;

pub struct PortAllocator {
    host: String,
    start: u16,
    end: u16,
}

impl PortAllocator {
    pub fn new(host: impl Into<String>, start: u16, end: u16) -> Self {
        Self { host: host.into(), start, end }
    }

    /// First port in the inclusive range that accepts an exclusive bind.
    pub fn allocate(&self) -> Option<u16> {
        for port in self.start..=self.end {
            match TcpListener::bind((self.host.as_str(), port)) {
                Ok(listener) => {
                    drop(listener);
                    debug!("Allocated port {} from range {}-{}", port, self.start, self.end);
                    return Some(port);
                }
                Err(_) => continue,
            }
        }
        None
    }

    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }
}
