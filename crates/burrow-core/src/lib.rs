//! # burrow-core
//!
//! Platform-agnostic types and traits for the burrow tunnel daemon's
//! connection dispatcher.
//!
//! This crate provides:
//! - Error taxonomy (setup failures are fatal, connection failures are local)
//! - Dispatch / deregistration event types
//! - Server configuration
//! - The per-connection data-handler seam
//! - The packet-store seam (pcap-style record persistence)
//!
//! The dispatcher implementation lives in `burrow-server`; file-backed
//! packet storage lives in `burrow-pcap`.

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod store;

// Re-exports
pub use config::ServerConfig;
pub use error::{ArenaError, PoolError, ReactorError, ServerError, StoreError};
pub use event::{Deregister, WorkerId, WorkerSignal};
pub use handler::{DataHandler, DebugHandler};
pub use store::{AccessMode, FileHeader, PacketStore, RecordHeader};
