//! Server configuration
//!
//! One plain struct, constructed at startup and threaded through every
//! operation. There is no process-wide configuration state.

/// Configuration for the dispatcher server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind specification, resolved at startup ("[::]:6666" by default).
    pub bind: String,

    /// Listen backlog depth (must be >= 1).
    pub backlog: i32,

    /// Raise `RLIMIT_NOFILE` to `fd_limit` at startup.
    pub raise_fd_limit: bool,

    /// Descriptor ceiling applied when `raise_fd_limit` is set.
    pub fd_limit: u64,

    /// Worker threads per logical CPU (pool size = cpus * this).
    pub threads_per_cpu: usize,

    /// Explicit worker count, overriding the per-CPU sizing policy.
    pub workers: Option<usize>,

    /// Depth of each worker's inbound dispatch queue. A full queue
    /// drops the dispatch (logged), it never blocks the reactor.
    pub inbound_depth: usize,

    /// Depth of the shared wake-back deregistration queue.
    pub wakeback_depth: usize,

    /// Arena size per worker, in pages (two of them become guards).
    pub arena_pages: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "[::]:6666".to_string(),
            backlog: 5,
            raise_fd_limit: true,
            fd_limit: 10_000,
            threads_per_cpu: 2,
            workers: None,
            inbound_depth: 64,
            wakeback_depth: 1024,
            arena_pages: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_daemon_contract() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind, "[::]:6666");
        assert_eq!(cfg.backlog, 5);
        assert_eq!(cfg.fd_limit, 10_000);
        assert_eq!(cfg.threads_per_cpu, 2);
        assert_eq!(cfg.arena_pages, 32);
    }
}
