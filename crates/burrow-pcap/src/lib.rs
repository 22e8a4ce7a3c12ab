//! # burrow-pcap
//!
//! Plain-file implementation of the `PacketStore` interface: classic
//! pcap containers read and written with ordinary buffered file I/O.
//! Headers and records are little-endian on the wire; a byte-swapped
//! magic on read flips decoding for files written on the other
//! endianness.
//!
//! The dispatcher in `burrow-server` never touches this crate; it exists
//! for the surrounding application to persist or replay packet records.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use burrow_core::error::StoreError;
use burrow_core::store::{AccessMode, FileHeader, PacketStore, RecordHeader};

/// Classic pcap magic, microsecond timestamps.
pub const MAGIC: u32 = 0xa1b2_c3d4;
/// Same magic as seen through the wrong endianness.
pub const MAGIC_SWAPPED: u32 = 0xd4c3_b2a1;

pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 4;

const FILE_HDR_LEN: usize = 24;
const RECORD_HDR_LEN: usize = 16;

/// A pcap container on a plain file.
pub struct PcapFile {
    file: File,
    /// Records and headers need byte-swapping on read.
    swapped: bool,
}

impl PcapFile {
    /// Create (truncate) a capture file for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            swapped: false,
        })
    }

    /// Open an existing capture file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            swapped: false,
        })
    }

    /// Wrap an already positioned file handle.
    pub fn from_file(file: File) -> Self {
        Self {
            file,
            swapped: false,
        }
    }

    /// Build a header describing a fresh capture.
    pub fn new_header(snaplen: u32, linktype: u32) -> FileHeader {
        FileHeader {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            thiszone: 0,
            sigfigs: 0,
            snaplen,
            linktype,
        }
    }

    /// Read exactly `buf.len()` bytes or report how far we got.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<(), StoreError> {
        let mut got = 0;
        while got < buf.len() {
            match self.file.read(&mut buf[got..]) {
                Ok(0) => {
                    return Err(StoreError::Truncated {
                        wanted: buf.len(),
                        got,
                    })
                }
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(())
    }

    fn u32_at(&self, buf: &[u8], off: usize) -> u32 {
        let raw = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        if self.swapped {
            raw.swap_bytes()
        } else {
            raw
        }
    }

    fn u16_at(&self, buf: &[u8], off: usize) -> u16 {
        let raw = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        if self.swapped {
            raw.swap_bytes()
        } else {
            raw
        }
    }
}

impl PacketStore for PcapFile {
    fn pull_file_header(&mut self) -> Result<FileHeader, StoreError> {
        let mut buf = [0u8; FILE_HDR_LEN];
        self.read_full(&mut buf)?;

        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        self.swapped = match magic {
            MAGIC => false,
            MAGIC_SWAPPED => true,
            other => return Err(StoreError::BadMagic(other)),
        };

        Ok(FileHeader {
            magic: MAGIC,
            version_major: self.u16_at(&buf, 4),
            version_minor: self.u16_at(&buf, 6),
            thiszone: self.u32_at(&buf, 8) as i32,
            sigfigs: self.u32_at(&buf, 12),
            snaplen: self.u32_at(&buf, 16),
            linktype: self.u32_at(&buf, 20),
        })
    }

    fn push_file_header(&mut self, hdr: &FileHeader) -> Result<(), StoreError> {
        let mut buf = [0u8; FILE_HDR_LEN];
        buf[0..4].copy_from_slice(&hdr.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&hdr.version_major.to_le_bytes());
        buf[6..8].copy_from_slice(&hdr.version_minor.to_le_bytes());
        buf[8..12].copy_from_slice(&hdr.thiszone.to_le_bytes());
        buf[12..16].copy_from_slice(&hdr.sigfigs.to_le_bytes());
        buf[16..20].copy_from_slice(&hdr.snaplen.to_le_bytes());
        buf[20..24].copy_from_slice(&hdr.linktype.to_le_bytes());
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn prepare_access(&mut self, _mode: AccessMode, _jumbo: bool) -> Result<(), StoreError> {
        // Hook for I/O priority or readahead tuning; plain files need none.
        Ok(())
    }

    fn read_record(&mut self, buf: &mut [u8]) -> Result<(RecordHeader, usize), StoreError> {
        let mut hdr_buf = [0u8; RECORD_HDR_LEN];
        self.read_full(&mut hdr_buf)?;

        let hdr = RecordHeader {
            ts_sec: self.u32_at(&hdr_buf, 0),
            ts_usec: self.u32_at(&hdr_buf, 4),
            caplen: self.u32_at(&hdr_buf, 8),
            len: self.u32_at(&hdr_buf, 12),
        };
        let caplen = hdr.caplen as usize;
        if caplen == 0 || caplen > buf.len() {
            return Err(StoreError::Oversize {
                caplen,
                max: buf.len(),
            });
        }
        self.read_full(&mut buf[..caplen])?;
        Ok((hdr, caplen))
    }

    fn write_record(&mut self, hdr: &RecordHeader, payload: &[u8]) -> Result<usize, StoreError> {
        if hdr.caplen as usize != payload.len() {
            return Err(StoreError::LengthMismatch {
                caplen: hdr.caplen as usize,
                len: payload.len(),
            });
        }

        let mut hdr_buf = [0u8; RECORD_HDR_LEN];
        hdr_buf[0..4].copy_from_slice(&hdr.ts_sec.to_le_bytes());
        hdr_buf[4..8].copy_from_slice(&hdr.ts_usec.to_le_bytes());
        hdr_buf[8..12].copy_from_slice(&hdr.caplen.to_le_bytes());
        hdr_buf[12..16].copy_from_slice(&hdr.len.to_le_bytes());
        self.file.write_all(&hdr_buf)?;
        self.file.write_all(payload)?;
        Ok(RECORD_HDR_LEN + payload.len())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TempPath(PathBuf);

    impl TempPath {
        fn new(tag: &str) -> Self {
            let p = std::env::temp_dir().join(format!(
                "burrow-pcap-{}-{}.pcap",
                tag,
                std::process::id()
            ));
            TempPath(p)
        }
    }

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn header_and_records_round_trip() {
        let path = TempPath::new("roundtrip");

        let mut writer = PcapFile::create(&path.0).unwrap();
        writer.push_file_header(&PcapFile::new_header(65535, 1)).unwrap();
        let rec = RecordHeader {
            ts_sec: 1000,
            ts_usec: 42,
            caplen: 4,
            len: 60,
        };
        let n = writer.write_record(&rec, b"\xde\xad\xbe\xef").unwrap();
        assert_eq!(n, RECORD_HDR_LEN + 4);
        writer.sync().unwrap();

        let mut reader = PcapFile::open(&path.0).unwrap();
        reader.prepare_access(AccessMode::Read, false).unwrap();
        let hdr = reader.pull_file_header().unwrap();
        assert_eq!(hdr.magic, MAGIC);
        assert_eq!((hdr.version_major, hdr.version_minor), (2, 4));
        assert_eq!(hdr.snaplen, 65535);
        assert_eq!(hdr.linktype, 1);

        let mut buf = [0u8; 128];
        let (got, n) = reader.read_record(&mut buf).unwrap();
        assert_eq!(got, rec);
        assert_eq!(&buf[..n], b"\xde\xad\xbe\xef");

        // Past the last record: a truncated header, not a panic.
        assert!(matches!(
            reader.read_record(&mut buf),
            Err(StoreError::Truncated { wanted: 16, got: 0 })
        ));
    }

    #[test]
    fn caplen_mismatch_is_rejected() {
        let path = TempPath::new("mismatch");
        let mut writer = PcapFile::create(&path.0).unwrap();
        let rec = RecordHeader {
            ts_sec: 0,
            ts_usec: 0,
            caplen: 10,
            len: 10,
        };
        assert!(matches!(
            writer.write_record(&rec, b"short"),
            Err(StoreError::LengthMismatch { caplen: 10, len: 5 })
        ));
    }

    #[test]
    fn record_larger_than_buffer_is_rejected() {
        let path = TempPath::new("oversize");

        let mut writer = PcapFile::create(&path.0).unwrap();
        writer.push_file_header(&PcapFile::new_header(65535, 1)).unwrap();
        let rec = RecordHeader {
            ts_sec: 0,
            ts_usec: 0,
            caplen: 64,
            len: 64,
        };
        writer.write_record(&rec, &[0u8; 64]).unwrap();

        let mut reader = PcapFile::open(&path.0).unwrap();
        reader.pull_file_header().unwrap();
        let mut small = [0u8; 16];
        assert!(matches!(
            reader.read_record(&mut small),
            Err(StoreError::Oversize { caplen: 64, max: 16 })
        ));
    }

    #[test]
    fn swapped_magic_flips_decoding() {
        let path = TempPath::new("swapped");

        // Hand-build a big-endian file: swapped magic, then fields that
        // only decode correctly if the reader honors the swap.
        let mut raw = Vec::new();
        raw.extend_from_slice(&MAGIC.to_be_bytes());
        raw.extend_from_slice(&VERSION_MAJOR.to_be_bytes());
        raw.extend_from_slice(&VERSION_MINOR.to_be_bytes());
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&9000u32.to_be_bytes());
        raw.extend_from_slice(&1u32.to_be_bytes());
        std::fs::write(&path.0, &raw).unwrap();

        let mut reader = PcapFile::open(&path.0).unwrap();
        let hdr = reader.pull_file_header().unwrap();
        assert_eq!(hdr.version_major, 2);
        assert_eq!(hdr.snaplen, 9000);
        assert_eq!(hdr.linktype, 1);
    }

    #[test]
    fn garbage_magic_is_rejected() {
        let path = TempPath::new("garbage");
        std::fs::write(&path.0, [0u8; 24]).unwrap();
        let mut reader = PcapFile::open(&path.0).unwrap();
        assert!(matches!(
            reader.pull_file_header(),
            Err(StoreError::BadMagic(0))
        ));
    }
}
