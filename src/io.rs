//! Host I/O capability: a `BlockIo` trait standing in for a set of
//! read/write/flush/truncate callbacks a host supplies, modelled as a trait
//! rather than a vtable-plus-context record.
//!
//! `FileBlockIo` backs this with a real `std::fs::File`. `MemBlockIo` backs
//! it with an in-memory byte vector, used throughout this crate's own unit
//! and integration tests.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::IoFailure;

/// Host-supplied random-access block storage. Implementations may back onto
/// a real file, flash, or (in tests) a byte vector.
pub trait BlockIo {
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<usize, IoFailure>;
    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<usize, IoFailure>;
    fn flush(&mut self) -> Result<(), IoFailure>;
    /// Shrinks (or, per `File::set_len`, grows) the underlying storage to
    /// exactly `len` bytes. Used by `init_for_append` to discard a stale
    /// interior level built by a previous `finalize`.
    fn truncate(&mut self, len: u64) -> Result<(), IoFailure>;
}

/// Backs a `BlockIo` with a real `std::fs::File`.
pub struct FileBlockIo {
    file: File,
}

impl FileBlockIo {
    pub fn new(file: File) -> Self {
        FileBlockIo { file }
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

impl BlockIo for FileBlockIo {
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<usize, IoFailure> {
        self.file.seek(SeekFrom::Start(pos)).map_err(IoFailure::Seek)?;
        self.file.read_exact(buf).map_err(IoFailure::Read)?;
        Ok(buf.len())
    }

    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<usize, IoFailure> {
        self.file.seek(SeekFrom::Start(pos)).map_err(IoFailure::Seek)?;
        self.file.write_all(buf).map_err(IoFailure::Write)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), IoFailure> {
        self.file.flush().map_err(IoFailure::Flush)?;
        self.file.sync_data().map_err(IoFailure::Flush)
    }

    fn truncate(&mut self, len: u64) -> Result<(), IoFailure> {
        self.file.set_len(len).map_err(IoFailure::Write)
    }
}

/// In-memory `BlockIo`, grows on write past the current end. Used by unit
/// tests throughout the crate and re-exported for integration tests that
/// don't need a real file.
#[derive(Debug, Default, Clone)]
pub struct MemBlockIo {
    data: Vec<u8>,
}

impl MemBlockIo {
    pub fn new() -> Self {
        MemBlockIo::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

impl BlockIo for MemBlockIo {
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<usize, IoFailure> {
        let pos = pos as usize;
        let end = pos.checked_add(buf.len()).ok_or_else(too_far)?;
        if end > self.data.len() {
            return Err(too_far());
        }
        buf.copy_from_slice(&self.data[pos..end]);
        Ok(buf.len())
    }

    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<usize, IoFailure> {
        let pos = pos as usize;
        let end = pos.checked_add(buf.len()).ok_or_else(too_far)?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[pos..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), IoFailure> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<(), IoFailure> {
        self.data.truncate(len as usize);
        Ok(())
    }
}

fn too_far() -> IoFailure {
    IoFailure::Read(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "read past end of in-memory block",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_block_io_round_trips_writes() {
        let mut io = MemBlockIo::new();
        io.write_at(b"hello", 0).unwrap();
        io.write_at(b"world", 10).unwrap();
        assert_eq!(io.len(), 15);

        let mut buf = [0u8; 5];
        io.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
        io.read_at(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn mem_block_io_rejects_reads_past_end() {
        let mut io = MemBlockIo::new();
        io.write_at(b"hi", 0).unwrap();
        let mut buf = [0u8; 10];
        assert!(io.read_at(&mut buf, 0).is_err());
    }
}
