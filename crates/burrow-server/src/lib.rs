//! # burrow-server
//!
//! The connection dispatcher of the burrow tunnel daemon: a single
//! reactor thread accepts TCP connections and multiplexes readiness,
//! and a fixed pool of CPU-pinned worker threads performs the socket
//! I/O, each worker owning a guard-bounded memory arena.
//!
//! This crate provides:
//! - Guarded arena allocator (mmap with no-access boundary pages)
//! - CPU-affinity pinning capability
//! - Wake-back channel (workers -> reactor deregistration path)
//! - Worker pool lifecycle
//! - The epoll reactor and the `Server` context tying it all together
//!
//! Ownership rules make the whole design lock-free: a descriptor is
//! touched by at most one thread at a time, each arena is private to its
//! worker, and each channel has a single consumer.

pub mod affinity;
pub mod arena;
pub mod pool;
pub mod reactor;
pub mod rlimit;
pub mod server;
pub mod wakeback;

// Re-exports
pub use arena::Arena;
pub use pool::{PoolConfig, WorkerPool};
pub use reactor::Reactor;
pub use server::{Server, ServerHandle, Stopper};
pub use wakeback::WakeBack;
