//! Tree finaliser: after the last leaf is flushed, builds interior B-tree
//! levels bottom-up by re-reading just-written pages through the `BlockIo`
//! read path, never holding more than one page (plus a few bytes of header
//! scratch) in RAM at once.

use crate::error::{Error, Result};
use crate::io::BlockIo;
use crate::page::{PageBuffer, PageKind};
use crate::varint;

/// Reads just enough of `page_number` to learn the maximum row-id in its
/// subtree, without loading the full page. Uses the reserved-bytes footer
/// when available (O(1)); otherwise descends the right-most-child chain,
/// which always terminates at the page actually holding the highest row-id.
fn read_page_max_rowid<IO: BlockIo>(
    io: &mut IO,
    page_size: usize,
    resv_bytes: usize,
    page_number: u32,
) -> Result<u64> {
    let page_offset = (page_number as u64 - 1) * page_size as u64;

    if resv_bytes >= 8 {
        let mut footer = [0u8; 8];
        io.read_at(&mut footer, page_offset + (page_size - resv_bytes) as u64)
            .map_err(Error::ReadErr)?;
        return Ok(varint::read_u64(&footer));
    }

    let mut flag = [0u8; 1];
    io.read_at(&mut flag, page_offset).map_err(Error::ReadErr)?;
    let kind = PageKind::from_flag(flag[0])?;
    let header_size = match kind {
        PageKind::Leaf => 8,
        PageKind::Interior => 12,
    };

    let mut header_buf = [0u8; 12];
    io.read_at(&mut header_buf[..header_size], page_offset)
        .map_err(Error::ReadErr)?;
    let cell_count = u16::from_be_bytes([header_buf[3], header_buf[4]]);

    match kind {
        PageKind::Interior => {
            let right_most = u32::from_be_bytes([
                header_buf[8],
                header_buf[9],
                header_buf[10],
                header_buf[11],
            ]);
            read_page_max_rowid(io, page_size, resv_bytes, right_most)
        }
        PageKind::Leaf => {
            if cell_count == 0 {
                return Err(Error::Malformed("leaf has no cells"));
            }
            let pointer_array_start = page_offset + header_size as u64;
            let last_pointer_offset = pointer_array_start + (cell_count as u64 - 1) * 2;
            let mut ptr_buf = [0u8; 2];
            io.read_at(&mut ptr_buf, last_pointer_offset).map_err(Error::ReadErr)?;
            let cell_offset = u16::from_be_bytes(ptr_buf) as u64;

            let remaining = (page_size as u64 - cell_offset).min(18) as usize;
            let mut scratch = [0u8; 18];
            io.read_at(&mut scratch[..remaining], page_offset + cell_offset)
                .map_err(Error::ReadErr)?;
            let (_, n1) = varint::read_varint(&scratch[..remaining]);
            let (rowid, _) = varint::read_varint(&scratch[n1..remaining]);
            Ok(rowid)
        }
    }
}

/// Builds one interior level over input pages `first..=last`, writing output
/// pages starting at `next_page`. Returns `(new_level_first, new_level_last,
/// next_free_page)`.
fn build_level<IO: BlockIo>(
    io: &mut IO,
    page_size: usize,
    resv_bytes: usize,
    first: u32,
    last: u32,
    next_page: u32,
) -> Result<(u32, u32, u32)> {
    let level_first_output = next_page;
    let mut current_page_number = next_page;
    let mut page = PageBuffer::new(page_size, 0, resv_bytes);
    page.init_page(PageKind::Interior);

    let mut p = first;
    loop {
        let max_rowid = read_page_max_rowid(io, page_size, resv_bytes, p)?;

        let becomes_right_child = if p == last {
            true
        } else {
            match page.add_interior_entry(p, max_rowid) {
                Ok(()) => false,
                Err(Error::RowTooBig(_)) => true,
                Err(e) => return Err(e),
            }
        };

        if becomes_right_child {
            page.set_right_child(p);
            page.finalize_page_header(Some(max_rowid));
            let offset = (current_page_number as u64 - 1) * page_size as u64;
            io.write_at(page.bytes(), offset).map_err(Error::WriteErr)?;
            io.flush().map_err(Error::FlushErr)?;
            log::trace!("tree: wrote interior page {current_page_number} (right child {p})");

            p += 1;
            if p > last {
                break;
            }
            current_page_number += 1;
            page = PageBuffer::new(page_size, 0, resv_bytes);
            page.init_page(PageKind::Interior);
        } else {
            p += 1;
        }
    }

    Ok((level_first_output, current_page_number, current_page_number + 1))
}

/// Builds interior levels over leaves `2..=1+leaf_count` until a single root
/// page remains. Returns the root page number, which (page numbering being
/// contiguous and gap-free) also equals the final total page count.
pub fn finalize<IO: BlockIo>(io: &mut IO, page_size: usize, resv_bytes: usize, leaf_count: u32) -> Result<u32> {
    let mut first = 2u32;
    let mut last = 1 + leaf_count;
    let mut next_free = last + 1;

    loop {
        if last - first + 1 == 1 {
            log::debug!("tree: root is page {first}");
            return Ok(first);
        }
        log::debug!("tree: building interior level over pages {first}..={last}");
        let (new_first, new_last, new_next_free) =
            build_level(io, page_size, resv_bytes, first, last, next_free)?;
        first = new_first;
        last = new_last;
        next_free = new_next_free;
    }
}
