//! Per-connection data-handler seam
//!
//! Workers read the available bytes off a dispatched descriptor and hand
//! them to a `DataHandler`. What happens next (protocol dissection,
//! tunnel framing, chained per-protocol handlers keyed off a next-header
//! field) is the handler's business; the dispatcher core knows
//! nothing about payload contents.

use std::os::fd::RawFd;

use crate::event::WorkerId;

/// Callback invoked by a worker with the bytes it read from a connection.
///
/// Implementations are shared across all workers and must be `Send + Sync`;
/// the dispatcher guarantees that no two workers ever deliver bytes from
/// the same dispatch event.
pub trait DataHandler: Send + Sync {
    fn on_data(&self, worker: WorkerId, fd: RawFd, bytes: &[u8]);
}

/// Handler that just logs fd and length of everything it sees.
///
/// Stand-in for a real tunnel endpoint during bring-up.
#[derive(Debug, Default)]
pub struct DebugHandler;

impl DataHandler for DebugHandler {
    fn on_data(&self, worker: WorkerId, fd: RawFd, bytes: &[u8]) {
        tracing::debug!(worker = %worker, fd, len = bytes.len(), "data received");
    }
}

impl<F> DataHandler for F
where
    F: Fn(WorkerId, RawFd, &[u8]) + Send + Sync,
{
    fn on_data(&self, worker: WorkerId, fd: RawFd, bytes: &[u8]) {
        self(worker, fd, bytes)
    }
}
