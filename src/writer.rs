//! Append writer: the state machine that accumulates column values into
//! a pending row, places rows on the current leaf, flushes full leaves, and
//! resumes a previously finalised file for further appends.

use zerocopy::{AsBytes, FromBytes};

use crate::error::{Error, Result};
use crate::header::{self, DbHeader, MasterPageLayout, HEADER_SIZE};
use crate::io::BlockIo;
use crate::page::{get_page_size_exp, PageBuffer, PageKind};
use crate::record::{ColumnRef, RecordWriter};
use crate::tree;

/// The type tag half of the `(type_tag, value_ptr, length_hint)` triple
/// `set_col_val` accepts. Width selection for `Int` is the caller's
/// responsibility: 1/2/4/8-byte slices select serial types 1/2/4/6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Null,
    Int,
    Real,
    Text,
    Blob,
}

#[derive(Debug, Clone)]
enum PendingCol {
    Null,
    Int(Vec<u8>),
    Real(Vec<u8>),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

impl PendingCol {
    fn as_column_ref(&self) -> ColumnRef<'_> {
        match self {
            PendingCol::Null => ColumnRef::Null,
            PendingCol::Int(bytes) => ColumnRef::Int { bytes },
            PendingCol::Real(bytes) => ColumnRef::Real { bytes },
            PendingCol::Text(bytes) => ColumnRef::Text(bytes),
            PendingCol::Blob(bytes) => ColumnRef::Blob(bytes),
        }
    }
}

/// Collects the handful of parameters a fresh database needs before
/// `Writer::write_init` runs, in place of scattering magic numbers (page
/// size, reserved bytes, table name) across call sites.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    page_size: u32,
    col_count: usize,
    table_name: String,
    max_pages_exp: u8,
    page_resv_bytes: u8,
}

impl WriterConfig {
    pub fn new(page_size: u32, col_count: usize) -> Self {
        WriterConfig {
            page_size,
            col_count,
            table_name: "log".to_string(),
            max_pages_exp: 0,
            page_resv_bytes: 0,
        }
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub fn max_pages_exp(mut self, exp: u8) -> Self {
        self.max_pages_exp = exp;
        self
    }

    pub fn page_resv_bytes(mut self, bytes: u8) -> Self {
        self.page_resv_bytes = bytes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    LeafOpen,
    Finalized,
}

pub struct Writer<IO> {
    io: IO,
    config: WriterConfig,
    page_size: usize,
    resv_bytes: usize,
    master_layout: MasterPageLayout,
    leaf: PageBuffer,
    current_leaf_page: u32,
    leaf_count: u32,
    last_rowid: u64,
    pending: Vec<PendingCol>,
    state: State,
}

impl<IO: BlockIo> Writer<IO> {
    /// `write_init`: formats page 1 and opens an empty first leaf (page 2).
    pub fn write_init(mut io: IO, config: WriterConfig) -> Result<Self> {
        if get_page_size_exp(config.page_size) == 0 {
            return Err(Error::InvalidPageSize(config.page_size));
        }

        let (page1, master_layout) = header::build_page1(
            config.page_size,
            config.page_resv_bytes,
            &config.table_name,
            config.col_count,
        )?;
        io.write_at(page1.bytes(), 0).map_err(Error::WriteErr)?;
        io.flush().map_err(Error::FlushErr)?;
        log::debug!("writer: write_init wrote page 1 ({} byte pages)", config.page_size);

        let mut leaf = PageBuffer::new(config.page_size as usize, 0, config.page_resv_bytes as usize);
        leaf.init_page(PageKind::Leaf);

        let col_count = config.col_count;
        Ok(Writer {
            io,
            resv_bytes: config.page_resv_bytes as usize,
            page_size: config.page_size as usize,
            config,
            master_layout,
            leaf,
            current_leaf_page: 2,
            leaf_count: 1,
            last_rowid: 0,
            pending: std::iter::repeat(PendingCol::Null).take(col_count).collect(),
            state: State::LeafOpen,
        })
    }

    /// `init_for_append`: reopens a finalised file, recovers writer state
    /// from the last leaf, and invalidates previously built interior levels
    /// (they are rebuilt on the next `finalize`).
    pub fn init_for_append(mut io: IO, config: WriterConfig, file_len: u64) -> Result<Self> {
        let mut header_buf = vec![0u8; HEADER_SIZE];
        io.read_at(&mut header_buf, 0).map_err(Error::ReadErr)?;
        let header =
            DbHeader::read_from(&header_buf).ok_or(Error::Malformed("truncated database header"))?;
        header.validate()?;

        let page_size = header.page_size() as usize;
        if page_size != config.page_size as usize {
            return Err(Error::InvalidPageSize(header.page_size()));
        }

        let existing_pages = header.in_header_db_size() as u64;
        if existing_pages < 2 {
            return Err(Error::Malformed("database has no data leaves"));
        }

        // Leaves occupy pages 2..=existing_pages in a freshly finalised file
        // only if that file had exactly one leaf; in general we must find
        // the true leaf count by walking forward from page 2 until a page
        // is no longer a leaf (an interior page, or past EOF), since earlier
        // interior levels may already have been built by a prior finalize.
        let mut leaf_count = 0u32;
        let mut probe = vec![0u8; page_size];
        loop {
            let page_number = 2 + leaf_count as u64;
            let offset = (page_number - 1) * page_size as u64;
            if offset + page_size as u64 > file_len {
                break;
            }
            io.read_at(&mut probe, offset).map_err(Error::ReadErr)?;
            if probe[0] != crate::page::LEAF_TABLE_FLAG {
                break;
            }
            leaf_count += 1;
        }
        if leaf_count == 0 {
            return Err(Error::Malformed("no leaf pages found"));
        }

        // Page 1 plus leaf_count leaves; any bytes beyond this were a
        // previous finalize's interior levels, now invalid.
        let truncated_len = page_size as u64 + leaf_count as u64 * page_size as u64;
        if truncated_len < file_len {
            log::warn!(
                "writer: init_for_append discarding interior levels, truncating {file_len} -> {truncated_len} bytes"
            );
            io.truncate(truncated_len).map_err(Error::WriteErr)?;
        }

        let last_leaf_page = 1 + leaf_count;
        let mut leaf = PageBuffer::new(page_size, 0, config.page_resv_bytes as usize);
        let mut leaf_bytes = vec![0u8; page_size];
        io.read_at(&mut leaf_bytes, (last_leaf_page as u64 - 1) * page_size as u64)
            .map_err(Error::ReadErr)?;
        leaf.load(&leaf_bytes)?;
        let last_rowid = leaf.last_leaf_rowid()?;

        log::debug!(
            "writer: init_for_append resumed at leaf {last_leaf_page}, last_rowid={last_rowid}"
        );

        let mut page1_bytes = vec![0u8; page_size];
        io.read_at(&mut page1_bytes, 0).map_err(Error::ReadErr)?;
        let rootpage_offset = find_master_rootpage_offset(&page1_bytes, page_size)?;

        let col_count = config.col_count;
        Ok(Writer {
            io,
            resv_bytes: config.page_resv_bytes as usize,
            page_size,
            config,
            master_layout: MasterPageLayout { rootpage_offset },
            leaf,
            current_leaf_page: last_leaf_page,
            leaf_count,
            last_rowid,
            pending: std::iter::repeat(PendingCol::Null).take(col_count).collect(),
            state: State::LeafOpen,
        })
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            State::LeafOpen => Ok(()),
            State::Finalized => Err(Error::Finalized),
        }
    }

    /// `set_col_val`: records a typed value into the pending row's side
    /// buffer. Takes effect on the *next* committed row if called again
    /// after `append_empty_row`.
    pub fn set_col_val(&mut self, col_idx: usize, tag: TypeTag, value: &[u8]) -> Result<()> {
        self.check_open()?;
        if col_idx >= self.pending.len() {
            return Err(Error::Malformed("column index out of range"));
        }
        self.pending[col_idx] = match tag {
            TypeTag::Null => PendingCol::Null,
            TypeTag::Int => {
                if !matches!(value.len(), 1 | 2 | 4 | 8) {
                    return Err(Error::Malformed("INT column must be 1, 2, 4 or 8 bytes"));
                }
                PendingCol::Int(value.to_vec())
            }
            TypeTag::Real => {
                if value.len() != 8 {
                    return Err(Error::Malformed("REAL column must be 8 bytes"));
                }
                PendingCol::Real(value.to_vec())
            }
            TypeTag::Text => PendingCol::Text(value.to_vec()),
            TypeTag::Blob => PendingCol::Blob(value.to_vec()),
        };
        Ok(())
    }

    /// Commits the pending row (defaulting any never-set column to NULL),
    /// placing it on the current leaf or flushing to a new one if it
    /// doesn't fit. Returns the assigned row-id.
    pub fn append_empty_row(&mut self) -> Result<u64> {
        self.check_open()?;

        let max_pages_exp = self.config.max_pages_exp;
        if max_pages_exp != 0 && (self.current_leaf_page as u64) >= (1u64 << max_pages_exp) {
            return Err(Error::PageLimit(max_pages_exp));
        }

        let refs: Vec<ColumnRef> = self.pending.iter().map(PendingCol::as_column_ref).collect();
        let record_writer = RecordWriter::new(&refs)?;
        let mut record = vec![0u8; record_writer.total_len()];
        record_writer.write_into(&mut record);

        let rowid = self.last_rowid + 1;

        match self.leaf.add_cell(rowid, &record) {
            Ok(()) => {}
            Err(Error::RowTooBig(_)) if self.leaf.cell_count() > 0 => {
                self.flush_current_leaf()?;
                self.open_new_leaf()?;
                self.leaf.add_cell(rowid, &record)?;
            }
            Err(e) => return Err(e),
        }

        self.last_rowid = rowid;
        for col in &mut self.pending {
            *col = PendingCol::Null;
        }
        Ok(rowid)
    }

    /// `append_row_with_values`: convenience over `set_col_val` + `append_empty_row`.
    pub fn append_row_with_values(&mut self, values: &[(TypeTag, &[u8])]) -> Result<u64> {
        for (idx, (tag, value)) in values.iter().enumerate() {
            self.set_col_val(idx, *tag, value)?;
        }
        self.append_empty_row()
    }

    /// Convenience over `append_row_with_values` for types implementing
    /// `Row` (typically via `#[derive(Row)]`).
    pub fn append_row<R: crate::row::Row>(&mut self, row: &R) -> Result<u64> {
        let (columns, _) = crate::row::row_to_values(row);
        let refs = crate::row::values_as_refs(&columns);
        self.append_row_with_values(&refs)
    }

    fn flush_current_leaf(&mut self) -> Result<()> {
        let max_rowid = self.leaf.last_leaf_rowid().ok();
        self.leaf.finalize_page_header(max_rowid);
        let offset = (self.current_leaf_page as u64 - 1) * self.page_size as u64;
        log::trace!("writer: flushing leaf {}", self.current_leaf_page);
        self.io.write_at(self.leaf.bytes(), offset).map_err(Error::WriteErr)?;
        self.io.flush().map_err(Error::FlushErr)?;
        Ok(())
    }

    fn open_new_leaf(&mut self) -> Result<()> {
        self.current_leaf_page += 1;
        self.leaf_count += 1;
        self.leaf.init_page(PageKind::Leaf);
        Ok(())
    }

    /// `finalize`: flushes the current leaf, builds interior levels bottom
    /// up via the tree finaliser, and patches page 1 with the final root
    /// page number, page count and an incremented change counter.
    pub fn finalize(mut self) -> Result<IO> {
        self.check_open()?;

        self.flush_current_leaf()?;

        let root = tree::finalize(&mut self.io, self.page_size, self.resv_bytes, self.leaf_count)?;

        let mut header_buf = vec![0u8; HEADER_SIZE];
        self.io.read_at(&mut header_buf, 0).map_err(Error::ReadErr)?;
        let mut db_header =
            DbHeader::read_from(&header_buf).ok_or(Error::Malformed("truncated database header"))?;
        db_header.set_in_header_db_size(root);
        db_header.bump_change_counter();
        db_header.write_to(&mut header_buf).expect("100-byte header");

        let mut page1 = vec![0u8; self.page_size];
        self.io.read_at(&mut page1, 0).map_err(Error::ReadErr)?;
        page1[..HEADER_SIZE].copy_from_slice(&header_buf);
        header::patch_rootpage(&mut page1, &self.master_layout, root);

        self.io.write_at(&page1, 0).map_err(Error::WriteErr)?;
        self.io.flush().map_err(Error::FlushErr)?;
        log::debug!("writer: finalize complete, root page {root}, {root} total pages");

        self.state = State::Finalized;
        Ok(self.io)
    }
}

/// Re-derives the `rootpage` column's byte offset the same way
/// `header::build_page1` computed it, by parsing the one cell on the
/// `sqlite_master` leaf that follows the 100-byte header on page 1.
fn find_master_rootpage_offset(page1_bytes: &[u8], page_size: usize) -> Result<usize> {
    let mut page = PageBuffer::new(page_size, HEADER_SIZE, 0);
    page.load(page1_bytes)?;
    let cell_offset = page.cell_pointer(0);
    header_column_offset(&page, cell_offset)
}

fn header_column_offset(page: &PageBuffer, cell_offset: usize) -> Result<usize> {
    let data = page.bytes();
    let (payload_len, n1) = crate::varint::read_varint(&data[cell_offset..]);
    let (_, n2) = crate::varint::read_varint(&data[cell_offset + n1..]);
    let record_start = cell_offset + n1 + n2;
    let record = &data[record_start..record_start + payload_len as usize];

    let (header_len, hn) = crate::varint::read_varint(record);
    let mut header_pos = hn;
    let mut body_pos = header_len as usize;
    let mut idx = 0usize;
    while header_pos < header_len as usize {
        let (code, len) = crate::varint::read_varint(&record[header_pos..]);
        header_pos += len;
        if idx == 3 {
            return Ok(record_start + body_pos);
        }
        body_pos += crate::record::derive_data_len(code) as usize;
        idx += 1;
    }
    Err(Error::Malformed("sqlite_master row missing rootpage column"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemBlockIo;

    fn text(s: &str) -> (TypeTag, &[u8]) {
        (TypeTag::Text, s.as_bytes())
    }

    #[test]
    fn hello_world_two_rows_is_two_pages() {
        let io = MemBlockIo::new();
        let config = WriterConfig::new(512, 5).table_name("log");
        let mut writer = Writer::write_init(io, config).unwrap();

        let row1 = [text("Hello"), text("World"), text("How"), text("Are"), text("You")];
        let row2 = [text("I"), text("am"), text("fine"), text("thank"), text("you")];
        assert_eq!(writer.append_row_with_values(&row1).unwrap(), 1);
        assert_eq!(writer.append_row_with_values(&row2).unwrap(), 2);

        let io = writer.finalize().unwrap();
        assert_eq!(io.len(), 1024);
    }

    #[test]
    fn int_width_selection_produces_expected_serial_types() {
        let io = MemBlockIo::new();
        let config = WriterConfig::new(4096, 1);
        let mut writer = Writer::write_init(io, config).unwrap();

        for value in [127i64, 128, 32768, 2147483648] {
            let width = match value {
                v if i8::try_from(v).is_ok() => 1,
                v if i16::try_from(v).is_ok() => 2,
                v if i32::try_from(v).is_ok() => 4,
                _ => 8,
            };
            let bytes = value.to_be_bytes();
            let slice = &bytes[8 - width..];
            writer.set_col_val(0, TypeTag::Int, slice).unwrap();
            writer.append_empty_row().unwrap();
        }
    }

    #[test]
    fn row_too_big_on_empty_leaf_is_rejected() {
        let io = MemBlockIo::new();
        let config = WriterConfig::new(512, 1);
        let mut writer = Writer::write_init(io, config).unwrap();
        let huge = vec![b'x'; 10_000];
        let err = writer.append_row_with_values(&[(TypeTag::Blob, &huge)]).unwrap_err();
        assert!(matches!(err, Error::RowTooBig(_)));
    }
}
