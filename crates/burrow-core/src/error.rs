//! Error types for the burrow dispatcher
//!
//! Two failure classes exist and they never mix: setup errors
//! (`ArenaError`, `PoolError`, most `ReactorError` variants) abort startup,
//! while per-connection I/O failures never surface here at all; they are
//! handled locally by the worker that observed them.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Errors from guarded arena creation.
///
/// All of these are fatal: a worker without its arena is not spawned,
/// and partial pools are not supported.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("arena of {size} bytes cannot hold two guard pages")]
    TooSmall { size: usize },

    #[error("mmap of {size} byte arena failed: {source}")]
    Map { size: usize, source: io::Error },

    #[error("mprotect of arena guard page failed: {source}")]
    Protect { source: io::Error },
}

/// Errors from worker-pool construction and teardown.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    ZeroWorkers,

    #[error("worker inbound queue depth must be at least one")]
    ZeroDepth,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to pin worker {worker} to cpu {cpu}: {source}")]
    Affinity {
        worker: usize,
        cpu: usize,
        source: io::Error,
    },

    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// Errors from the reactor: listener setup, epoll bookkeeping, waiting.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("cannot resolve bind address {spec:?}: {source}")]
    Resolve { spec: String, source: io::Error },

    #[error("no bindable address for {spec:?}")]
    NoUsableAddress { spec: String },

    #[error("listen backlog must be at least 1, got {0}")]
    BadBacklog(i32),

    #[error("cannot create epoll instance: {0}")]
    EpollCreate(#[source] io::Error),

    #[error("cannot register fd {fd} for readiness: {source}")]
    EpollAdd { fd: RawFd, source: io::Error },

    #[error("cannot create wake-back eventfd: {0}")]
    EventFd(#[source] io::Error),

    #[error("epoll_wait failed: {0}")]
    Wait(#[source] io::Error),
}

/// Top-level server error, aggregating the setup taxonomy.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Reactor(#[from] ReactorError),

    #[error("failed to spawn reactor thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("reactor thread panicked")]
    ReactorPanicked,
}

/// Errors from a packet-store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("unknown pcap magic {0:#010x}")]
    BadMagic(u32),

    #[error("truncated header: wanted {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },

    #[error("record capture length {caplen} exceeds buffer of {max} bytes")]
    Oversize { caplen: usize, max: usize },

    #[error("record capture length {caplen} does not match payload of {len} bytes")]
    LengthMismatch { caplen: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_display() {
        let e = PoolError::ZeroWorkers;
        assert_eq!(format!("{}", e), "worker pool needs at least one worker");

        let e = ArenaError::TooSmall { size: 4096 };
        assert!(format!("{}", e).contains("guard pages"));
    }

    #[test]
    fn error_conversion() {
        let e: PoolError = ArenaError::TooSmall { size: 0 }.into();
        assert!(matches!(e, PoolError::Arena(ArenaError::TooSmall { .. })));

        let e: ServerError = PoolError::ZeroWorkers.into();
        assert!(matches!(e, ServerError::Pool(PoolError::ZeroWorkers)));
    }
}
