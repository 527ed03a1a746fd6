//! Iterates over the cells in a btree page, and rebuilds a page's cell
//! layout from a list of cell byte blobs.
//!
//! Mutation in this engine always rewrites a page's cell-pointer array and
//! content area from scratch rather than patching free blocks in place: cells
//! are packed contiguously from the end of the usable page backward, in key
//! order, leaving zero fragmentation after every write. This keeps the
//! invariant (`free blocks + fragmented bytes + cell bytes + header +
//! pointer array = page size`) trivially true, at the cost of rewriting more
//! bytes per mutation than an in-place free-block allocator would.

use super::header::{self, Header};
use super::PageType;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Seek, SeekFrom};

/// Iterator over cells within a page, without interpreting the cell contents.
pub struct Iterator<'a> {
    page: &'a [u8],
    cell_idx: usize,
    cell_offsets: Vec<usize>,
    cell_lengths: Vec<usize>,
}

impl<'a> Iterator<'a> {
    pub fn new(p: &'a [u8], non_btree_header_bytes: usize, page_size: u32) -> Iterator<'a> {
        let hdr = header::check_header(p, non_btree_header_bytes);
        let mut c = Cursor::new(p);
        c.seek(SeekFrom::Start(
            (hdr.byte_size() + non_btree_header_bytes) as u64,
        ))
        .expect("Should have seeked to cell offset.");

        let mut it = Iterator {
            page: p,
            cell_idx: 0,
            cell_offsets: Vec::new(),
            cell_lengths: Vec::new(),
        };

        let mut last_offset: usize = page_size as usize;
        for _ in 0..hdr.num_cells {
            let off = c
                .read_u16::<BigEndian>()
                .expect("Should have read cell pointer") as usize;
            it.cell_offsets.push(off);
            it.cell_lengths.push(last_offset.saturating_sub(off));
            last_offset = off;
        }
        it
    }

    pub fn count(&self) -> usize {
        self.cell_offsets.len()
    }
}

impl<'a> core::iter::Iterator for Iterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.cell_idx >= self.cell_offsets.len() {
            return None;
        }
        let b = self.cell_offsets[self.cell_idx];
        let e = b + self.cell_lengths[self.cell_idx];
        self.cell_idx += 1;
        Some(&self.page[b..e])
    }
}

/// Rebuilds `page[non_btree_header_bytes..]` from scratch: writes the b-tree
/// page header, the cell pointer array, and packs `cells` contiguously from
/// the end of the page backward, in the order given (callers must pass cells
/// already sorted by key). Returns `false` without modifying `page` if the
/// cells don't fit in the available space.
pub fn write_page_cells(
    page: &mut [u8],
    non_btree_header_bytes: usize,
    page_type: PageType,
    rightmost_pointer: Option<u32>,
    cells: &[Vec<u8>],
) -> bool {
    let usable = page.len();
    let header_bytes = page_type.header_bytes();
    let pointer_array_bytes = cells.len() * 2;
    let total_cell_bytes: usize = cells.iter().map(|c| c.len()).sum();
    let content_start_from_end = total_cell_bytes;
    let available = usable
        .saturating_sub(non_btree_header_bytes)
        .saturating_sub(header_bytes)
        .saturating_sub(pointer_array_bytes);
    if content_start_from_end > available {
        return false;
    }

    let mut offsets = Vec::with_capacity(cells.len());
    let mut cursor = usable;
    for cell in cells {
        cursor -= cell.len();
        offsets.push(cursor);
    }

    let hdr = Header {
        btree_page_type: page_type,
        freeblock_start: 0,
        num_cells: cells.len() as u32,
        cell_content_start: cursor as u32,
        fragmented_free_bytes: 0,
        rightmost_pointer,
    };
    header::write_header(page, non_btree_header_bytes, &hdr);

    let ptr_array_start = non_btree_header_bytes + header_bytes;
    for (i, off) in offsets.iter().enumerate() {
        let p = ptr_array_start + i * 2;
        page[p..p + 2].copy_from_slice(&(*off as u16).to_be_bytes());
    }
    for (cell, off) in cells.iter().zip(offsets.iter()) {
        page[*off..*off + cell.len()].copy_from_slice(cell);
    }
    // Zero the gap between the pointer array and the content area so stale
    // bytes from a previous, larger cell set never leak into a scan.
    let gap_start = ptr_array_start + pointer_array_bytes;
    if gap_start < cursor {
        for b in &mut page[gap_start..cursor] {
            *b = 0;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // From command: xxd resources/test/multipage-512B-page.db
    const TEST_PAGE: &str = "0d00 0000 0a01 ce00 01fb 01f6 01f1 01ec
01e7 01e2 01dd 01d8 01d3 01ce 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 030a
020f 4a03 0902 0f49 0308 020f 4803 0702
0f47 0306 020f 4603 0502 0f45 0304 020f
4403 0302 0f43 0302 020f 4203 0102 0f41";

    #[test]
    fn test_cell_iterator() {
        use hex::FromHex;
        let p: Vec<u8> = Vec::from_hex(TEST_PAGE.replace([' ', '\n'], "")).expect("Invalid Hex String");
        assert_eq!(p.len(), 512);
        let mut ci = Iterator::new(&p, 0, 512);
        assert_eq!(ci.next().unwrap(), Vec::from_hex("0301020f41").unwrap());
        assert_eq!(ci.count(), 10);
    }

    #[test]
    fn write_then_read_back_round_trips() {
        let cells = vec![vec![1u8, 2, 3], vec![4u8, 5], vec![6u8]];
        let mut page = vec![0u8; 512];
        assert!(write_page_cells(&mut page, 0, PageType::TableLeaf, None, &cells));
        let read: Vec<Vec<u8>> = Iterator::new(&page, 0, 512).map(|s| s.to_vec()).collect();
        assert_eq!(read, cells);
    }

    #[test]
    fn rejects_cells_that_do_not_fit() {
        let cells = vec![vec![0u8; 1000]];
        let mut page = vec![0u8; 512];
        assert!(!write_page_cells(&mut page, 0, PageType::TableLeaf, None, &cells));
    }
}
