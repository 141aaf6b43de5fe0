//! Host port allocation for container port mappings.

use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, PoisonError};

/// Hands out free host TCP ports on demand.
///
/// Each call binds a listening socket to port 0 on loopback, reads back the
/// OS-assigned ephemeral port, closes the socket and returns the number. A
/// mutex serializes concurrent callers within the process so two
/// near-simultaneous calls never observe the same transient port.
///
/// The reservation is best-effort: the socket is closed before the caller
/// binds the port, so another process may grab it in between. Callers must
/// treat a later bind failure as retryable.
///
/// One explicit allocator instance is injected per fixture; there is no
/// process-wide singleton.
#[derive(Debug, Default)]
pub struct PortAllocator {
    lock: Mutex<()>,
}

impl PortAllocator {
    /// Create a new allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a free host port on loopback
    pub fn allocate(&self) -> io::Result<u16> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(port)
    }
}
