//! Free-port allocation.
//!
//! A port is found by binding an ephemeral socket on port 0 and releasing it.
//! The OS may hand the same port out again once released, so every port given
//! out is recorded and binding happens under one lock: two allocations never
//! return the same port, even when called from concurrent tasks.

use crate::error::{ClusterError, Result};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::{Mutex, PoisonError};

/// Bind attempts before giving up on finding an unreserved port.
const MAX_BIND_ATTEMPTS: u32 = 64;

/// Hands out ports that are free on `host` and unique for this allocator.
#[derive(Debug)]
pub struct PortAllocator {
    host: IpAddr,
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator for the given bind host.
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Host addresses are allocated on.
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Reserve one free port.
    pub fn allocate(&self) -> Result<u16> {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..MAX_BIND_ATTEMPTS {
            let listener = TcpListener::bind((self.host, 0))?;
            let port = listener.local_addr()?.port();
            drop(listener);
            if reserved.insert(port) {
                tracing::debug!("Reserved port {}", port);
                return Ok(port);
            }
        }
        Err(ClusterError::PortsExhausted {
            attempts: MAX_BIND_ATTEMPTS,
        })
    }

    /// Reserve one free port and return it as a socket address on `host`.
    pub fn allocate_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.host, self.allocate()?))
    }

    /// Number of ports handed out so far.
    pub fn reserved_count(&self) -> usize {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
