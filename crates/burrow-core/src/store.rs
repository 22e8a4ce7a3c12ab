//! Packet-store seam
//!
//! Interface for persisting and replaying captured packet records in a
//! pcap-style container: a file header followed by length-prefixed
//! records. The dispatcher core never calls this; it exists so the
//! surrounding application can plug in a storage backend (see
//! `burrow-pcap` for the plain-file implementation) without the
//! dispatcher depending on one.

use crate::error::StoreError;

/// Classic pcap global file header (24 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    /// GMT-to-local correction, seconds.
    pub thiszone: i32,
    /// Timestamp accuracy; in practice always zero.
    pub sigfigs: u32,
    /// Max bytes captured per record.
    pub snaplen: u32,
    pub linktype: u32,
}

/// Per-record header (16 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub ts_sec: u32,
    pub ts_usec: u32,
    /// Bytes actually stored for this record.
    pub caplen: u32,
    /// Original length on the wire.
    pub len: u32,
}

/// Direction a store is about to be used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A pcap-style record store.
///
/// Implementations own their underlying descriptor; every operation works
/// at the current position, so callers drive header I/O before record I/O.
pub trait PacketStore {
    /// Read and validate the global file header.
    fn pull_file_header(&mut self) -> Result<FileHeader, StoreError>;

    /// Write the global file header.
    fn push_file_header(&mut self, hdr: &FileHeader) -> Result<(), StoreError>;

    /// Hook invoked once before sequential record access begins
    /// (I/O priority tuning, readahead, jumbo-frame sizing).
    fn prepare_access(&mut self, mode: AccessMode, jumbo: bool) -> Result<(), StoreError>;

    /// Read one record into `buf`. Returns the record header and the
    /// number of payload bytes written into `buf`.
    fn read_record(&mut self, buf: &mut [u8]) -> Result<(RecordHeader, usize), StoreError>;

    /// Write one record. `hdr.caplen` must equal `payload.len()`.
    /// Returns total bytes written (header + payload).
    fn write_record(&mut self, hdr: &RecordHeader, payload: &[u8]) -> Result<usize, StoreError>;

    /// Flush buffered records to stable storage.
    fn sync(&mut self) -> Result<(), StoreError>;
}
