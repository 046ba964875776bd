//! `sqlog`: an append-only logger engine that writes a single-table
//! SQLite-3-compatible database file under a one-page-buffer memory budget.
//!
//! Modules mirror the leaf-to-root build order this crate was written in:
//! byte codec, record encoding, page layout, database header, host I/O,
//! interior tree finalisation, the append-only writer, a read-side
//! B-tree search API, and a typed convenience layer on top of both.

extern crate self as sqlog;

pub mod error;
pub mod header;
pub mod io;
pub mod page;
pub mod reader;
pub mod record;
pub mod row;
pub mod tree;
pub mod varint;
pub mod writer;

pub use error::{Error, IoFailure, Result};
pub use io::{BlockIo, FileBlockIo, MemBlockIo};
pub use page::get_page_size_exp;
pub use reader::{BinSearchValue, Reader};
pub use record::derive_data_len;
pub use row::{Row, RowColumn};
pub use writer::{TypeTag, Writer, WriterConfig};

pub use sqlog_macros::Row;
