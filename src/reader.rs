//! Reader: opens a finalised file, descends the B-tree by row-id or by
//! binary search on a column, and exposes the current row's columns.
//!
//! Descent holds exactly one page resident at a time: every step reloads
//! `self.page` rather than keeping a parent and child page around together.

use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::header::{DbHeader, HEADER_SIZE};
use crate::io::BlockIo;
use crate::page::{PageBuffer, PageKind};
use crate::record::{parse_record, ColumnValue};
use crate::varint;

pub struct Reader<IO> {
    io: IO,
    page_size: usize,
    root_page: u32,
    page: PageBuffer,
    cur_cell_offset: Option<usize>,
}

impl<IO: BlockIo> Reader<IO> {
    /// `read_init`: loads page 1, verifies the magic, and learns the root
    /// page of the data table from the `sqlite_master` row.
    pub fn read_init(mut io: IO) -> Result<Self> {
        let mut page1_bytes_probe = vec![0u8; HEADER_SIZE];
        io.read_at(&mut page1_bytes_probe, 0).map_err(Error::ReadErr)?;
        let header = DbHeader::read_from(&page1_bytes_probe)
            .ok_or(Error::Malformed("truncated database header"))?;
        header.validate()?;
        let page_size = header.page_size() as usize;

        let mut page1_bytes = vec![0u8; page_size];
        io.read_at(&mut page1_bytes, 0).map_err(Error::ReadErr)?;
        let mut master = PageBuffer::new(page_size, HEADER_SIZE, 0);
        master.load(&page1_bytes)?;

        let cell_offset = master.cell_pointer(0);
        let root_page = read_rootpage(&master, cell_offset)?;
        if root_page == 0 {
            return Err(Error::NotFinalized);
        }
        log::debug!("reader: read_init root page {root_page}, page size {page_size}");

        Ok(Reader {
            io,
            page_size,
            root_page,
            page: PageBuffer::new(page_size, 0, 0),
            cur_cell_offset: None,
        })
    }

    fn load_page(&mut self, page_number: u32) -> Result<()> {
        let mut bytes = vec![0u8; self.page_size];
        self.io
            .read_at(&mut bytes, (page_number as u64 - 1) * self.page_size as u64)
            .map_err(Error::ReadErr)?;
        self.page.load(&bytes)
    }

    fn interior_cell(&self, index: u16) -> (u32, u64) {
        let offset = self.page.cell_pointer(index);
        let data = self.page.bytes();
        let left_child = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap());
        let (key, _) = varint::read_varint(&data[offset + 4..]);
        (left_child, key)
    }

    fn leaf_cell_rowid(&self, index: u16) -> u64 {
        let offset = self.page.cell_pointer(index);
        let data = self.page.bytes();
        let (_, n1) = varint::read_varint(&data[offset..]);
        let (rowid, _) = varint::read_varint(&data[offset + n1..]);
        rowid
    }

    /// `srch_row_by_id`: descends the tree for an exact row-id match.
    pub fn srch_row_by_id(&mut self, rowid: u64) -> Result<()> {
        let mut page_number = self.root_page;
        loop {
            self.load_page(page_number)?;
            match self.page.kind() {
                PageKind::Interior => {
                    page_number = self.choose_child(rowid);
                }
                PageKind::Leaf => {
                    let count = self.page.cell_count();
                    let mut lo = 0i64;
                    let mut hi = count as i64 - 1;
                    while lo <= hi {
                        let mid = (lo + hi) / 2;
                        let mid_rowid = self.leaf_cell_rowid(mid as u16);
                        if mid_rowid == rowid {
                            self.cur_cell_offset = Some(self.page.cell_pointer(mid as u16));
                            return Ok(());
                        } else if mid_rowid < rowid {
                            lo = mid + 1;
                        } else {
                            hi = mid - 1;
                        }
                    }
                    return Err(Error::NotFound);
                }
            }
        }
    }

    fn choose_child(&self, rowid: u64) -> u32 {
        let count = self.page.cell_count();
        let mut lo = 0i64;
        let mut hi = count as i64 - 1;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            let (_, key) = self.interior_cell(mid as u16);
            if rowid <= key {
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }
        if lo >= count as i64 {
            self.page.right_most_child()
        } else {
            self.interior_cell(lo as u16).0
        }
    }

    /// `bin_srch_row_by_val`: descends to the leftmost leaf whose first row's
    /// column is `>=` the target, then binary-searches within that leaf. The
    /// indicated column must be non-decreasing across leaves (caller's
    /// responsibility).
    pub fn bin_srch_row_by_val(&mut self, col_idx: usize, value: BinSearchValue, is_rowid: bool) -> Result<()> {
        if is_rowid {
            let rowid = match value {
                BinSearchValue::Int(v) => v as u64,
                _ => return Err(Error::Malformed("is_rowid search requires an INT value")),
            };
            return self.srch_row_by_id(rowid);
        }

        let mut page_number = self.root_page;
        loop {
            self.load_page(page_number)?;
            match self.page.kind() {
                PageKind::Interior => {
                    // Children's first values are non-decreasing left to
                    // right, so the target (if present) lives under the
                    // last child whose first value is still <= target.
                    let count = self.page.cell_count();
                    let mut chosen = self.page.right_most_child();
                    if count > 0 {
                        chosen = self.interior_cell(0).0;
                        for i in 1..count {
                            let (child, _) = self.interior_cell(i);
                            let first_val = self.peek_first_column_value(child, col_idx)?;
                            if compare_column(&first_val, &value) == std::cmp::Ordering::Greater {
                                break;
                            }
                            chosen = child;
                        }
                        let right_most = self.page.right_most_child();
                        let right_first = self.peek_first_column_value(right_most, col_idx)?;
                        if compare_column(&right_first, &value) != std::cmp::Ordering::Greater {
                            chosen = right_most;
                        }
                    }
                    page_number = chosen;
                }
                PageKind::Leaf => {
                    let count = self.page.cell_count();
                    for i in 0..count {
                        let offset = self.page.cell_pointer(i);
                        let value_at = self.column_value_at(offset, col_idx)?;
                        if compare_column(&value_at, &value) == std::cmp::Ordering::Equal {
                            self.cur_cell_offset = Some(offset);
                            return Ok(());
                        }
                    }
                    return Err(Error::NotFound);
                }
            }
        }
    }

    fn peek_first_column_value(&mut self, page_number: u32, col_idx: usize) -> Result<ColumnValue> {
        let saved = std::mem::replace(&mut self.page, PageBuffer::new(self.page_size, 0, 0));
        self.load_page(page_number)?;
        let mut descend_page = page_number;
        loop {
            match self.page.kind() {
                PageKind::Leaf => break,
                PageKind::Interior => {
                    let (child, _) = self.interior_cell(0);
                    descend_page = child;
                    self.load_page(descend_page)?;
                }
            }
        }
        let offset = self.page.cell_pointer(0);
        let value = self.column_value_at(offset, col_idx)?;
        self.page = saved;
        Ok(value)
    }

    fn column_value_at(&self, cell_offset: usize, col_idx: usize) -> Result<ColumnValue> {
        let data = self.page.bytes();
        let (payload_len, n1) = varint::read_varint(&data[cell_offset..]);
        let (_, n2) = varint::read_varint(&data[cell_offset + n1..]);
        let record_start = cell_offset + n1 + n2;
        let record = &data[record_start..record_start + payload_len as usize];
        let columns = parse_record(record);
        let (ty, body) = *columns
            .get(col_idx)
            .ok_or(Error::Malformed("column index out of range"))?;
        Ok(ColumnValue::read(ty, body).0)
    }

    /// Number of columns in the row currently positioned on.
    pub fn cur_row_col_count(&self) -> Result<usize> {
        let offset = self.cur_cell_offset.ok_or(Error::NotFound)?;
        let data = self.page.bytes();
        let (payload_len, n1) = varint::read_varint(&data[offset..]);
        let (_, n2) = varint::read_varint(&data[offset + n1..]);
        let record_start = offset + n1 + n2;
        let record = &data[record_start..record_start + payload_len as usize];
        Ok(parse_record(record).len())
    }

    /// `read_col_val`: decoded value of column `col_idx` in the current row.
    pub fn read_col_val(&self, col_idx: usize) -> Result<ColumnValue> {
        let offset = self.cur_cell_offset.ok_or(Error::NotFound)?;
        self.column_value_at(offset, col_idx)
    }
}

/// Typed comparison for `bin_srch_row_by_val`: NULL < numeric < TEXT/BLOB
/// byte-lexicographic, INT promoted to REAL when compared against one.
fn compare_column(a: &ColumnValue, target: &BinSearchValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, target) {
        (ColumnValue::Null, BinSearchValue::Null) => Ordering::Equal,
        (ColumnValue::Null, _) => Ordering::Less,
        (_, BinSearchValue::Null) => Ordering::Greater,
        (a, BinSearchValue::Int(t)) if is_numeric(a) => {
            numeric_value(a).partial_cmp(&(*t as f64)).unwrap_or(Ordering::Equal)
        }
        (a, BinSearchValue::Real(t)) if is_numeric(a) => {
            numeric_value(a).partial_cmp(t).unwrap_or(Ordering::Equal)
        }
        (ColumnValue::Text(s), BinSearchValue::Text(t)) => s.as_bytes().cmp(t),
        (ColumnValue::Blob(b), BinSearchValue::Blob(t)) => b.as_slice().cmp(t),
        _ => Ordering::Equal,
    }
}

fn is_numeric(v: &ColumnValue) -> bool {
    matches!(
        v,
        ColumnValue::I8(_)
            | ColumnValue::I16(_)
            | ColumnValue::I24(_)
            | ColumnValue::I32(_)
            | ColumnValue::I48(_)
            | ColumnValue::I64(_)
            | ColumnValue::F64(_)
            | ColumnValue::Zero
            | ColumnValue::One
    )
}

fn numeric_value(v: &ColumnValue) -> f64 {
    match v {
        ColumnValue::I8(x) => *x as f64,
        ColumnValue::I16(x) => *x as f64,
        ColumnValue::I24(x) => *x as f64,
        ColumnValue::I32(x) => *x as f64,
        ColumnValue::I48(x) => *x as f64,
        ColumnValue::I64(x) => *x as f64,
        ColumnValue::F64(x) => *x,
        ColumnValue::Zero => 0.0,
        ColumnValue::One => 1.0,
        _ => 0.0,
    }
}

/// A typed comparison target for `bin_srch_row_by_val`.
#[derive(Debug, Clone)]
pub enum BinSearchValue {
    Null,
    Int(i64),
    Real(f64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

fn read_rootpage(page: &PageBuffer, cell_offset: usize) -> Result<u32> {
    let data = page.bytes();
    let (payload_len, n1) = varint::read_varint(&data[cell_offset..]);
    let (_, n2) = varint::read_varint(&data[cell_offset + n1..]);
    let record_start = cell_offset + n1 + n2;
    let record = &data[record_start..record_start + payload_len as usize];
    let columns = parse_record(record);
    let (ty, body) = *columns.get(3).ok_or(Error::Malformed("missing rootpage column"))?;
    match ColumnValue::read(ty, body).0 {
        ColumnValue::I64(v) => Ok(v as u32),
        ColumnValue::I32(v) => Ok(v as u32),
        _ => Err(Error::Malformed("rootpage column has unexpected type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemBlockIo;
    use crate::writer::{TypeTag, Writer, WriterConfig};

    fn build_sample(page_size: u32, rows: &[Vec<(TypeTag, Vec<u8>)>]) -> MemBlockIo {
        let io = MemBlockIo::new();
        let col_count = rows[0].len();
        let mut writer = Writer::write_init(io, WriterConfig::new(page_size, col_count)).unwrap();
        for row in rows {
            let refs: Vec<(TypeTag, &[u8])> = row.iter().map(|(t, v)| (*t, v.as_slice())).collect();
            writer.append_row_with_values(&refs).unwrap();
        }
        writer.finalize().unwrap()
    }

    #[test]
    fn srch_row_by_id_finds_and_misses() {
        let rows: Vec<Vec<(TypeTag, Vec<u8>)>> = (1..=5)
            .map(|i: i64| vec![(TypeTag::Int, i.to_be_bytes().to_vec())])
            .collect();
        let io = build_sample(512, &rows);
        let mut reader = Reader::read_init(io).unwrap();

        reader.srch_row_by_id(3).unwrap();
        assert_eq!(reader.read_col_val(0).unwrap(), ColumnValue::I64(3));

        assert!(matches!(reader.srch_row_by_id(99), Err(Error::NotFound)));
    }

    #[test]
    fn bin_srch_row_by_val_on_monotonic_column() {
        let rows: Vec<Vec<(TypeTag, Vec<u8>)>> = (0..2000)
            .step_by(2)
            .map(|i: i64| {
                vec![
                    (TypeTag::Int, 0i64.to_be_bytes().to_vec()),
                    (TypeTag::Int, i.to_be_bytes().to_vec()),
                ]
            })
            .collect();
        let io = build_sample(512, &rows);
        let mut reader = Reader::read_init(io).unwrap();

        reader.bin_srch_row_by_val(1, BinSearchValue::Int(1000), false).unwrap();
        assert_eq!(reader.read_col_val(1).unwrap(), ColumnValue::I64(1000));

        assert!(matches!(
            reader.bin_srch_row_by_val(1, BinSearchValue::Int(1001), false),
            Err(Error::NotFound)
        ));
    }
}
