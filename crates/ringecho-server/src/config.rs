//! Server configuration.

use std::time::Duration;

/// Fixed knobs for one server instance. No runtime reconfiguration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Size of each connection's receive/echo block.
    pub block_size: usize,
    /// Submission queue depth. Power of 2.
    pub sq_entries: u32,
    /// Idle timeout armed with every receive.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections (slab capacity).
    pub max_conns: usize,
    /// Listen backlog.
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            sq_entries: 64,
            idle_timeout: Duration::from_secs(5),
            max_conns: 1024,
            backlog: 128,
        }
    }
}
