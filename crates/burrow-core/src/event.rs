//! Dispatch and deregistration events
//!
//! A connection descriptor travels in exactly one direction at a time:
//! the reactor sends it to one worker as a `WorkerSignal::Conn`, and a
//! worker hands it back as a `Deregister` on the shared wake-back path.
//! Each event carries the descriptor itself; the signaling primitives
//! underneath are real queues, never bare counters, so no descriptor is
//! ever collapsed into an "N events happened" aggregate.

use std::fmt;
use std::os::fd::RawFd;

/// Identity of a worker within the pool (`0..worker_count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signal delivered on a worker's private inbound channel.
///
/// The reactor is the only producer; the owning worker is the only
/// consumer. Signals are processed in delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// A connection descriptor is ready for a read attempt.
    Conn(RawFd),
    /// Graceful-stop sentinel sent at teardown.
    Shutdown,
}

/// A deregistration request sent from a worker back to the reactor.
///
/// The worker never closes the descriptor; descriptor lifecycle stays
/// with the reactor, which removes it from the readiness set and drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deregister {
    pub fd: RawFd,
}
