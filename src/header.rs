//! Database-file formatter: the 100-byte database header and the
//! `sqlite_master` leaf that together make up page 1.
//!
//! The page size is divided by 256 and the quotient stored as a
//! little-endian word; a real reader reads that same field as big-endian,
//! so the two conventions cancel out into the right value on any host,
//! including 65536 (quotient 256, read back big-endian as `1`).

use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::byteorder::little_endian::U16 as LeU16;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{Error, Result};
use crate::page::{PageBuffer, PageKind};
use crate::record::{ColumnRef, RecordWriter};
use crate::varint;

pub const HEADER_SIZE: usize = 100;
pub const MAGIC: [u8; 16] = *b"SQLite format 3\0";

/// A frozen `SQLITE_VERSION_NUMBER`-shaped constant, matching the value
/// mainline SQLite releases encode as `(major*1000000 + minor*1000 + patch)`.
/// Real readers only use this for diagnostics, never to gate compatibility.
const SQLITE_VERSION_NUMBER: u32 = 3_045_000;

#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct DbHeader {
    header_string: [u8; 16],
    /// Page size divided by 256, stored as a little-endian word; a real
    /// reader reads this field as big-endian, so the on-disk bytes decode
    /// to `value * 256` there too, including 65536 (stored quotient 256,
    /// decoded big-endian as `1`).
    page_size_over_256: LeU16,
    write_version: u8,
    read_version: u8,
    reserved_space: u8,
    max_payload_fraction: u8,
    min_payload_fraction: u8,
    leaf_payload_fraction: u8,
    file_change_counter: U32,
    in_header_db_size: U32,
    first_freelist_page: U32,
    freelist_page_count: U32,
    schema_cookie: U32,
    schema_format: U32,
    default_cache_size: U32,
    largest_root_btree_page: U32,
    text_encoding: U32,
    user_version: U32,
    incremental_vacuum: U32,
    application_id: U32,
    reserved: [u8; 20],
    version_valid_for: U32,
    sqlite_version_number: U32,
}

impl DbHeader {
    pub fn new(page_size: u32, resv_bytes: u8) -> Self {
        let page_size_code = page_size / 256;

        DbHeader {
            header_string: MAGIC,
            page_size_over_256: LeU16::new(page_size_code as u16),
            write_version: 1,
            read_version: 1,
            reserved_space: resv_bytes,
            max_payload_fraction: 64,
            min_payload_fraction: 32,
            leaf_payload_fraction: 32,
            file_change_counter: U32::new(1),
            in_header_db_size: U32::new(0),
            first_freelist_page: U32::new(0),
            freelist_page_count: U32::new(0),
            schema_cookie: U32::new(1),
            schema_format: U32::new(4),
            default_cache_size: U32::new(0),
            largest_root_btree_page: U32::new(0),
            text_encoding: U32::new(1),
            user_version: U32::new(0),
            incremental_vacuum: U32::new(0),
            application_id: U32::new(0),
            reserved: [0u8; 20],
            version_valid_for: U32::new(1),
            sqlite_version_number: U32::new(SQLITE_VERSION_NUMBER),
        }
    }

    pub fn page_size(&self) -> u32 {
        let code = self.page_size_over_256.get() as u32;
        code * 256
    }

    pub fn validate(&self) -> Result<()> {
        if self.header_string != MAGIC {
            return Err(Error::Malformed("bad SQLite header magic"));
        }
        let page_size = self.page_size();
        if crate::page::get_page_size_exp(page_size) == 0 {
            return Err(Error::InvalidPageSize(page_size));
        }
        if self.schema_format.get() != 4 {
            return Err(Error::Malformed("unsupported schema format"));
        }
        if self.text_encoding.get() != 1 {
            return Err(Error::Malformed("unsupported text encoding"));
        }
        Ok(())
    }

    pub fn in_header_db_size(&self) -> u32 {
        self.in_header_db_size.get()
    }

    pub fn set_in_header_db_size(&mut self, pages: u32) {
        self.in_header_db_size = U32::new(pages);
    }

    pub fn bump_change_counter(&mut self) {
        let next = self.file_change_counter.get() + 1;
        self.file_change_counter = U32::new(next);
    }

    pub fn reserved_space(&self) -> u8 {
        self.reserved_space
    }
}

/// Byte offset of the `rootpage` column body within the `sqlite_master` row,
/// relative to the start of page 1. Finalise overwrites these 8 bytes
/// in-place rather than rebuilding the cell, since `rootpage` is always
/// emitted as a fixed-width 8-byte integer (serial type 6).
pub struct MasterPageLayout {
    pub rootpage_offset: usize,
}

/// Builds page 1: a `DbHeader` followed by a one-row `sqlite_master` leaf
/// describing `table_name` with `col_count` columns. The `rootpage` column
/// is written as a placeholder (0) so that `finalize` can patch it in place.
pub fn build_page1(
    page_size: u32,
    resv_bytes: u8,
    table_name: &str,
    col_count: usize,
) -> Result<(PageBuffer, MasterPageLayout)> {
    let header = DbHeader::new(page_size, resv_bytes);
    let mut page = PageBuffer::new(page_size as usize, HEADER_SIZE, resv_bytes as usize);
    page.init_page(PageKind::Leaf);

    let columns: Vec<String> = (0..col_count).map(|i| format!("c{i}")).collect();
    let create_sql = format!("CREATE TABLE {table_name} ({})", columns.join(", "));
    let rootpage_placeholder = 0i64.to_be_bytes();

    let refs = [
        ColumnRef::Text(b"table"),
        ColumnRef::Text(table_name.as_bytes()),
        ColumnRef::Text(table_name.as_bytes()),
        ColumnRef::Int { bytes: &rootpage_placeholder },
        ColumnRef::Text(create_sql.as_bytes()),
    ];
    let writer = RecordWriter::new(&refs)?;
    let mut record = vec![0u8; writer.total_len()];
    writer.write_into(&mut record);

    page.add_cell(1, &record)?;
    page.finalize_page_header(Some(1));

    let cell_offset = page.cell_pointer(0);
    let rootpage_offset = find_rootpage_offset(&page, cell_offset)?;

    let mut header_bytes = vec![0u8; HEADER_SIZE];
    header.write_to(&mut header_bytes[..]).expect("100-byte header");
    page.bytes_mut()[..HEADER_SIZE].copy_from_slice(&header_bytes);

    Ok((page, MasterPageLayout { rootpage_offset }))
}

fn find_rootpage_offset(page: &PageBuffer, cell_offset: usize) -> Result<usize> {
    let data = page.bytes();
    let (payload_len, n1) = varint::read_varint(&data[cell_offset..]);
    let (_, n2) = varint::read_varint(&data[cell_offset + n1..]);
    let record_start = cell_offset + n1 + n2;
    let record = &data[record_start..record_start + payload_len as usize];

    let (header_len, hn) = varint::read_varint(record);
    let mut header_pos = hn;
    let mut body_pos = header_len as usize;
    let mut serial_types = Vec::new();
    while header_pos < header_len as usize {
        let (code, len) = varint::read_varint(&record[header_pos..]);
        header_pos += len;
        serial_types.push(code);
    }

    // Column order: type, name, tbl_name, rootpage, sql.
    for (idx, code) in serial_types.iter().enumerate() {
        let data_len = crate::record::derive_data_len(*code) as usize;
        if idx == 3 {
            return Ok(record_start + body_pos);
        }
        body_pos += data_len;
    }

    Err(Error::Malformed("sqlite_master row missing rootpage column"))
}

/// Overwrites the `rootpage` column body of the `sqlite_master` row in page
/// 1's raw bytes with the final root page number.
pub fn patch_rootpage(page1_bytes: &mut [u8], layout: &MasterPageLayout, rootpage: u32) {
    let bytes = (rootpage as i64).to_be_bytes();
    page1_bytes[layout.rootpage_offset..layout.rootpage_offset + 8].copy_from_slice(&bytes);
}
