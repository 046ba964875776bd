//! Error taxonomy for the writer and reader.
//!
//! Every variant maps to a negative ABI-style status code via [`Error::code`],
//! the same negative-return convention a C-callable embedded engine uses.

use thiserror::Error;

/// A host I/O callback failed. `errno` carries whatever the host reported.
#[derive(Debug, Error)]
pub enum IoFailure {
    #[error("seek failed: {0}")]
    Seek(std::io::Error),
    #[error("read failed: {0}")]
    Read(std::io::Error),
    #[error("write failed: {0}")]
    Write(std::io::Error),
    #[error("flush failed: {0}")]
    Flush(std::io::Error),
}

impl IoFailure {
    pub fn errno(&self) -> Option<i32> {
        match self {
            IoFailure::Seek(e) | IoFailure::Read(e) | IoFailure::Write(e) | IoFailure::Flush(e) => {
                e.raw_os_error()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("read error: {0}")]
    ReadErr(#[source] IoFailure),
    #[error("write error: {0}")]
    WriteErr(#[source] IoFailure),
    #[error("flush error: {0}")]
    FlushErr(#[source] IoFailure),
    #[error("page size {0} is not one of 512..65536 (power of two)")]
    InvalidPageSize(u32),
    #[error("file has not been finalized yet, rootpage is still a placeholder")]
    NotFinalized,
    #[error("writer has already been finalized")]
    Finalized,
    #[error("row of {0} bytes does not fit on an empty page")]
    RowTooBig(usize),
    #[error("page limit of 2^{0} pages reached")]
    PageLimit(u8),
    #[error("corrupt page or varint encountered: {0}")]
    Malformed(&'static str),
    #[error("row or value not found")]
    NotFound,
}

impl Error {
    /// Negative ABI-style status code. Exact values are this crate's own
    /// assignment (see DESIGN.md); callers only need each variant to map to
    /// a distinct negative code.
    pub fn code(&self) -> i32 {
        match self {
            Error::ReadErr(_) => -1,
            Error::WriteErr(_) => -2,
            Error::FlushErr(_) => -3,
            Error::InvalidPageSize(_) => -4,
            Error::NotFinalized => -5,
            Error::Finalized => -6,
            Error::RowTooBig(_) => -7,
            Error::PageLimit(_) => -8,
            Error::Malformed(_) => -9,
            Error::NotFound => -10,
        }
    }

    /// The host `errno`, when this error originated from a callback failure.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::ReadErr(e) | Error::WriteErr(e) | Error::FlushErr(e) => e.errno(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
