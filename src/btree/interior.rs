//! Table b-tree interior cells: `4-byte big-endian left-child page number |
//! varint key`. The rightmost child pointer lives in the page header, not in
//! a cell, and covers every key greater than the last cell's key.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::cell;
use super::header;
use super::RowId;
use crate::pager::PageNum;

/// Decodes a table-interior cell into its left-child pointer and separator key.
pub fn decode_cell(cell: &[u8]) -> (PageNum, RowId) {
    let mut c = Cursor::new(cell);
    let left_child = c.read_u32::<BigEndian>().expect("cell too short") as PageNum;
    let (key, _) = sqlite_varint::read_varint(&cell[4..]);
    (left_child, key)
}

/// Encodes a table-interior cell.
pub fn encode_cell(left_child: PageNum, key: RowId) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.write_u32::<BigEndian>(left_child as u32).unwrap();
    crate::varint::write_varint(key, &mut out);
    out
}

/// Finds the child page that should hold `key`, by scanning the separator
/// keys of an interior page in order (ascending, per invariant) and picking
/// the first child whose separator is `>= key`, else the rightmost pointer.
///
/// Table interior pages are small enough in practice (one separator per
/// child, at most a few hundred per page) that a linear scan over the
/// already-decoded cell list is simple and fast; the entries are sorted so a
/// future optimization could switch to `partition_point`.
pub fn find_child_for_key(page: &[u8], non_btree_header_bytes: usize, page_size: u32, key: RowId) -> PageNum {
    let hdr = header::check_header(page, non_btree_header_bytes);
    let ci = cell::Iterator::new(page, non_btree_header_bytes, page_size);
    for raw in ci {
        let (left_child, sep_key) = decode_cell(raw);
        if key <= sep_key {
            return left_child;
        }
    }
    hdr.rightmost_pointer.expect("interior page must have a rightmost pointer") as PageNum
}

/// Returns every `(left_child, separator_key)` pair on this interior page, in
/// order, for use by split/rebalance logic that needs the full cell list.
pub fn decode_all_cells(page: &[u8], non_btree_header_bytes: usize, page_size: u32) -> Vec<(PageNum, RowId)> {
    cell::Iterator::new(page, non_btree_header_bytes, page_size)
        .map(decode_cell)
        .collect()
}

/// Iterator over just the child page numbers of an interior page (used for
/// full scans): every left child, in order, followed by the rightmost pointer.
pub struct ScanIterator<'a> {
    ci: cell::Iterator<'a>,
    returned_rightmost: bool,
    rightmost_pointer: PageNum,
}

impl<'a> ScanIterator<'a> {
    pub fn new(ci: cell::Iterator<'a>, rmp: PageNum) -> ScanIterator<'a> {
        ScanIterator {
            ci,
            returned_rightmost: false,
            rightmost_pointer: rmp,
        }
    }
}

impl<'a> core::iter::Iterator for ScanIterator<'a> {
    type Item = PageNum;

    fn next(&mut self) -> Option<Self::Item> {
        if self.returned_rightmost {
            return None;
        }
        match self.ci.next() {
            None => {
                self.returned_rightmost = true;
                Some(self.rightmost_pointer)
            }
            Some(cell) => {
                let (left_child, _) = decode_cell(cell);
                Some(left_child)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::PageType;

    #[test]
    fn find_child_for_key_picks_first_separator_gte_key() {
        let mut page = vec![0u8; 512];
        let cells = vec![encode_cell(10, 100), encode_cell(11, 200)];
        cell::write_page_cells(&mut page, 0, PageType::TableInterior, Some(12), &cells);

        assert_eq!(find_child_for_key(&page, 0, 512, 50), 10);
        assert_eq!(find_child_for_key(&page, 0, 512, 100), 10);
        assert_eq!(find_child_for_key(&page, 0, 512, 150), 11);
        assert_eq!(find_child_for_key(&page, 0, 512, 1000), 12);
    }

    #[test]
    fn decode_all_cells_round_trips() {
        let mut page = vec![0u8; 512];
        let cells = vec![encode_cell(1, 10), encode_cell(2, 20)];
        cell::write_page_cells(&mut page, 0, PageType::TableInterior, Some(3), &cells);
        let decoded = decode_all_cells(&page, 0, 512);
        assert_eq!(decoded, vec![(1, 10), (2, 20)]);
    }
}
