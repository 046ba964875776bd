//! Page formatter: lays out one in-RAM page buffer as a leaf (0x0D) or
//! interior (0x05) table B-tree page, and reads back just enough of an
//! already-written page to learn its maximum row-id without holding it
//! alongside another page.
//!
//! The interior header's `right_most_pointer` is 4 bytes, a full page
//! number, since a real SQLite reader rejects anything narrower.

use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{Error, Result};
use crate::varint;

pub const LEAF_TABLE_FLAG: u8 = 0x0d;
pub const INTERIOR_TABLE_FLAG: u8 = 0x05;

pub const LEAF_HEADER_SIZE: usize = 8;
pub const INTERIOR_HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Leaf,
    Interior,
}

impl PageKind {
    fn flag(self) -> u8 {
        match self {
            PageKind::Leaf => LEAF_TABLE_FLAG,
            PageKind::Interior => INTERIOR_TABLE_FLAG,
        }
    }

    fn header_size(self) -> usize {
        match self {
            PageKind::Leaf => LEAF_HEADER_SIZE,
            PageKind::Interior => INTERIOR_HEADER_SIZE,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            LEAF_TABLE_FLAG => Ok(PageKind::Leaf),
            INTERIOR_TABLE_FLAG => Ok(PageKind::Interior),
            _ => Err(Error::Malformed("unrecognised b-tree page flag")),
        }
    }
}

#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct RawLeafHeader {
    flags: u8,
    first_freeblock: U16,
    cell_count: U16,
    cell_content_start: U16,
    fragmented_free_bytes: u8,
}

#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct RawInteriorHeader {
    flags: u8,
    first_freeblock: U16,
    cell_count: U16,
    cell_content_start: U16,
    fragmented_free_bytes: u8,
    right_most_pointer: U32,
}

/// Returns the on-disk `cell_content_start` encoding: SQLite represents a
/// full-width content start of 65536 as 0, since the field is only 16 bits.
fn encode_content_start(value: usize) -> u16 {
    if value >= 65536 {
        0
    } else {
        value as u16
    }
}

fn decode_content_start(value: u16) -> usize {
    if value == 0 {
        65536
    } else {
        value as usize
    }
}

/// The single page-sized buffer a writer or finaliser ever holds. `header_offset`
/// is 100 for page 1 (which carries the database header first), 0 otherwise.
pub struct PageBuffer {
    data: Vec<u8>,
    page_size: usize,
    header_offset: usize,
    resv_bytes: usize,
    kind: PageKind,
    cell_count: u16,
    cell_content_start: usize,
}

impl PageBuffer {
    pub fn new(page_size: usize, header_offset: usize, resv_bytes: usize) -> Self {
        PageBuffer {
            data: vec![0u8; page_size],
            page_size,
            header_offset,
            resv_bytes,
            kind: PageKind::Leaf,
            cell_count: 0,
            cell_content_start: page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn cell_count(&self) -> u16 {
        self.cell_count
    }

    /// Resets the buffer to an empty page of the given kind. Does not touch
    /// bytes before `header_offset` (the database header on page 1).
    pub fn init_page(&mut self, kind: PageKind) {
        for b in &mut self.data[self.header_offset..self.page_size - self.resv_bytes] {
            *b = 0;
        }
        self.data[self.header_offset] = kind.flag();
        self.kind = kind;
        self.cell_count = 0;
        self.cell_content_start = self.usable_end();
    }

    fn pointer_array_start(&self) -> usize {
        self.header_offset + self.kind.header_size()
    }

    fn usable_end(&self) -> usize {
        self.page_size - self.resv_bytes
    }

    /// Bytes available for a new cell-pointer entry plus the cell itself.
    pub fn free_space(&self) -> usize {
        let pointer_array_end = self.pointer_array_start() + (self.cell_count as usize) * 2;
        self.cell_content_start.saturating_sub(pointer_array_end)
    }

    fn place_cell(&mut self, cell_len: usize) -> Result<usize> {
        if cell_len + 2 > self.free_space() {
            return Err(Error::RowTooBig(cell_len));
        }
        let offset = self.cell_content_start - cell_len;
        self.cell_content_start = offset;

        let pointer_offset = self.pointer_array_start() + (self.cell_count as usize) * 2;
        U16::new(offset as u16)
            .write_to(&mut self.data[pointer_offset..pointer_offset + 2])
            .expect("2-byte slice");
        self.cell_count += 1;

        Ok(offset)
    }

    /// Appends a leaf cell: `varint(payload_len) ∥ varint(rowid) ∥ record`.
    pub fn add_cell(&mut self, rowid: u64, record: &[u8]) -> Result<()> {
        debug_assert_eq!(self.kind, PageKind::Leaf);

        let payload_len = record.len() as u64;
        let mut head = [0u8; 18];
        let mut head_len = varint::write_varint(payload_len, &mut head);
        head_len += varint::write_varint(rowid, &mut head[head_len..]);
        let cell_len = head_len + record.len();

        if cell_len > self.usable_end() - self.header_offset - self.kind.header_size() {
            return Err(Error::RowTooBig(cell_len));
        }

        let offset = self.place_cell(cell_len)?;
        self.data[offset..offset + head_len].copy_from_slice(&head[..head_len]);
        self.data[offset + head_len..offset + cell_len].copy_from_slice(record);
        Ok(())
    }

    /// Appends an interior entry: `uint32(left_child) ∥ varint(rowid_key)`.
    pub fn add_interior_entry(&mut self, left_child: u32, rowid_key: u64) -> Result<()> {
        debug_assert_eq!(self.kind, PageKind::Interior);

        let mut key_buf = [0u8; 9];
        let key_len = varint::write_varint(rowid_key, &mut key_buf);
        let cell_len = 4 + key_len;

        let offset = self.place_cell(cell_len)?;
        self.data[offset..offset + 4].copy_from_slice(&left_child.to_be_bytes());
        self.data[offset + 4..offset + cell_len].copy_from_slice(&key_buf[..key_len]);
        Ok(())
    }

    pub fn set_right_child(&mut self, page: u32) {
        debug_assert_eq!(self.kind, PageKind::Interior);
        let offset = self.header_offset + 8;
        U32::new(page)
            .write_to(&mut self.data[offset..offset + 4])
            .expect("4-byte slice");
    }

    /// Writes the accumulated header fields back into the buffer, and — when
    /// reserved bytes allow it — a max-row-id footer used by the finaliser to
    /// learn a page's divider key in O(1) without re-parsing its cells.
    pub fn finalize_page_header(&mut self, max_rowid: Option<u64>) {
        let start = self.header_offset;
        match self.kind {
            PageKind::Leaf => {
                let header = RawLeafHeader {
                    flags: LEAF_TABLE_FLAG,
                    first_freeblock: U16::new(0),
                    cell_count: U16::new(self.cell_count),
                    cell_content_start: U16::new(encode_content_start(self.cell_content_start)),
                    fragmented_free_bytes: 0,
                };
                header
                    .write_to(&mut self.data[start..start + LEAF_HEADER_SIZE])
                    .expect("leaf header size");
            }
            PageKind::Interior => {
                let right_most_pointer =
                    U32::read_from(&self.data[start + 8..start + 12]).expect("4-byte slice");
                let header = RawInteriorHeader {
                    flags: INTERIOR_TABLE_FLAG,
                    first_freeblock: U16::new(0),
                    cell_count: U16::new(self.cell_count),
                    cell_content_start: U16::new(encode_content_start(self.cell_content_start)),
                    fragmented_free_bytes: 0,
                    right_most_pointer,
                };
                header
                    .write_to(&mut self.data[start..start + INTERIOR_HEADER_SIZE])
                    .expect("interior header size");
            }
        }

        if self.resv_bytes >= 8 {
            if let Some(rowid) = max_rowid {
                let footer_start = self.page_size - self.resv_bytes;
                varint::write_u64(&mut self.data[footer_start..footer_start + 8], rowid as u64);
            }
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Loads an already-written page's raw bytes (e.g. the last leaf on
    /// resume, or a page fetched for re-reading during finalise) as the
    /// active buffer, re-deriving the in-memory bookkeeping from its header.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len(), self.page_size);
        self.data.copy_from_slice(bytes);
        let flag = self.data[self.header_offset];
        self.kind = PageKind::from_flag(flag)?;
        let start = self.header_offset;
        match self.kind {
            PageKind::Leaf => {
                let header = RawLeafHeader::read_from(&self.data[start..start + LEAF_HEADER_SIZE])
                    .ok_or(Error::Malformed("truncated leaf header"))?;
                self.cell_count = header.cell_count.get();
                self.cell_content_start = decode_content_start(header.cell_content_start.get());
            }
            PageKind::Interior => {
                let header = RawInteriorHeader::read_from(&self.data[start..start + INTERIOR_HEADER_SIZE])
                    .ok_or(Error::Malformed("truncated interior header"))?;
                self.cell_count = header.cell_count.get();
                self.cell_content_start = decode_content_start(header.cell_content_start.get());
            }
        }
        Ok(())
    }

    pub fn cell_pointer(&self, index: u16) -> usize {
        let offset = self.pointer_array_start() + (index as usize) * 2;
        U16::read_from(&self.data[offset..offset + 2]).unwrap().get() as usize
    }

    /// The row-id of the last (highest-row-id) cell on a leaf page.
    pub fn last_leaf_rowid(&self) -> Result<u64> {
        debug_assert_eq!(self.kind, PageKind::Leaf);
        if self.cell_count == 0 {
            return Err(Error::Malformed("leaf has no cells"));
        }
        let offset = self.cell_pointer(self.cell_count - 1);
        let (_, len) = varint::read_varint(&self.data[offset..]);
        let (rowid, _) = varint::read_varint(&self.data[offset + len..]);
        Ok(rowid)
    }

    pub fn right_most_child(&self) -> u32 {
        debug_assert_eq!(self.kind, PageKind::Interior);
        let offset = self.header_offset + 8;
        U32::read_from(&self.data[offset..offset + 4]).unwrap().get()
    }

    /// The divider key stored for the left-most entry's left child is not
    /// what we want here; this is the interior page's own maximum row-id,
    /// i.e. the key of its last cell (the divider for its right-most child).
    pub fn last_interior_key(&self) -> Result<u64> {
        debug_assert_eq!(self.kind, PageKind::Interior);
        if self.cell_count == 0 {
            return Err(Error::Malformed("interior page has no cells"));
        }
        let offset = self.cell_pointer(self.cell_count - 1);
        let (rowid, _) = varint::read_varint(&self.data[offset + 4..]);
        Ok(rowid)
    }

    /// Reads the max-row-id footer written by `finalize_page_header`, if the
    /// page has reserved bytes to hold one.
    pub fn max_rowid_footer(&self) -> Option<u64> {
        if self.resv_bytes < 8 {
            return None;
        }
        let footer_start = self.page_size - self.resv_bytes;
        Some(varint::read_u64(&self.data[footer_start..footer_start + 8]))
    }
}

/// The exponent for a valid page size, or 0 if `page_size` isn't one of the
/// eight sizes SQLite allows.
pub fn get_page_size_exp(page_size: u32) -> u8 {
    match page_size {
        512 => 9,
        1024 => 10,
        2048 => 11,
        4096 => 12,
        8192 => 13,
        16384 => 14,
        32768 => 15,
        65536 => 16,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trip_of_header_fields() {
        let mut page = PageBuffer::new(512, 0, 0);
        page.init_page(PageKind::Leaf);
        page.add_cell(1, b"hello").unwrap();
        page.add_cell(2, b"world").unwrap();
        page.finalize_page_header(Some(2));

        let mut reloaded = PageBuffer::new(512, 0, 0);
        reloaded.load(page.bytes()).unwrap();
        assert_eq!(reloaded.kind(), PageKind::Leaf);
        assert_eq!(reloaded.cell_count(), 2);
        assert_eq!(reloaded.last_leaf_rowid().unwrap(), 2);
    }

    #[test]
    fn free_space_shrinks_as_cells_are_added() {
        let mut page = PageBuffer::new(512, 0, 0);
        page.init_page(PageKind::Leaf);
        let before = page.free_space();
        page.add_cell(1, b"x").unwrap();
        assert!(page.free_space() < before);
    }

    #[test]
    fn oversized_row_is_rejected() {
        let mut page = PageBuffer::new(512, 0, 0);
        page.init_page(PageKind::Leaf);
        let huge = vec![0u8; 1000];
        assert!(matches!(page.add_cell(1, &huge), Err(Error::RowTooBig(_))));
    }

    #[test]
    fn row_one_byte_over_capacity_is_rejected_but_smaller_fits() {
        let mut page = PageBuffer::new(512, 0, 0);
        page.init_page(PageKind::Leaf);

        // Binary search the largest record this empty 512-byte leaf accepts.
        let mut fits = 0usize;
        let mut too_big = 512usize;
        while fits + 1 < too_big {
            let mid = (fits + too_big) / 2;
            let mut probe = PageBuffer::new(512, 0, 0);
            probe.init_page(PageKind::Leaf);
            if probe.add_cell(1, &vec![0x41u8; mid]).is_ok() {
                fits = mid;
            } else {
                too_big = mid;
            }
        }

        assert!(page.add_cell(1, &vec![0x41u8; fits]).is_ok());
        let mut over = PageBuffer::new(512, 0, 0);
        over.init_page(PageKind::Leaf);
        assert!(matches!(
            over.add_cell(1, &vec![0x41u8; fits + 1]),
            Err(Error::RowTooBig(_))
        ));
    }

    #[test]
    fn interior_entries_carry_left_child_and_key() {
        let mut page = PageBuffer::new(512, 0, 0);
        page.init_page(PageKind::Interior);
        page.add_interior_entry(2, 10).unwrap();
        page.add_interior_entry(3, 20).unwrap();
        page.set_right_child(4);
        page.finalize_page_header(Some(20));

        let mut reloaded = PageBuffer::new(512, 0, 0);
        reloaded.load(page.bytes()).unwrap();
        assert_eq!(reloaded.right_most_child(), 4);
        assert_eq!(reloaded.last_interior_key().unwrap(), 20);
    }

    #[test]
    fn page_size_exponents_match_known_set() {
        assert_eq!(get_page_size_exp(512), 9);
        assert_eq!(get_page_size_exp(65536), 16);
        assert_eq!(get_page_size_exp(513), 0);
    }

    #[test]
    fn max_rowid_footer_round_trips_when_reserved() {
        let mut page = PageBuffer::new(512, 0, 8);
        page.init_page(PageKind::Leaf);
        page.add_cell(1, b"a").unwrap();
        page.finalize_page_header(Some(1));
        assert_eq!(page.max_rowid_footer(), Some(1));
    }
}
