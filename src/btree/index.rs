//! A cursor over one index b-tree: cells hold a complete encoded record
//! (the indexed column(s) followed by the rowid as the final column), ordered
//! by [`super::compare_record_bytes`], which gives the rowid as a natural
//! tiebreak between rows with equal indexed values.
//!
//! Structurally this mirrors [`super::table`]: explicit `(page, index)` stack
//! positions, in-place root preservation on split. Index-leaf cells support
//! overflow for large keys the same way table-leaf cells do; index-interior
//! separator keys are assumed to fit locally (real-world index keys are a
//! handful of columns, so this practically never overflows).

use super::{cell, header, overflow, Error, PageType, Result};
use crate::pager::{PageNum, Pager};
use crate::varint::{read_varint, write_varint};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor as IoCursor;

fn header_offset(pn: PageNum) -> usize {
    if pn == 1 {
        crate::dbheader::SQLITE_DB_HEADER_BYTES
    } else {
        0
    }
}

fn decode_leaf_cell_header(cell: &[u8]) -> (usize, std::ops::Range<usize>, Option<u32>) {
    let (payload_len, n1) = read_varint(cell);
    let remaining = cell.len() - n1;
    if remaining == payload_len as usize {
        (payload_len as usize, n1..cell.len(), None)
    } else {
        let local_len = remaining - 4;
        let first = u32::from_be_bytes(cell[n1 + local_len..n1 + local_len + 4].try_into().unwrap());
        (payload_len as usize, n1..n1 + local_len, Some(first))
    }
}

fn read_leaf_key(pager: &mut Pager, cell: &[u8]) -> Vec<u8> {
    let (total_len, range, overflow_page) = decode_leaf_cell_header(cell);
    let local = &cell[range];
    match overflow_page {
        None => local.to_vec(),
        Some(first) => overflow::read_full_payload(pager, local, Some(first as usize), total_len),
    }
}

fn encode_leaf_cell(pager: &mut Pager, key_bytes: &[u8]) -> crate::pager::Result<Vec<u8>> {
    let usable = pager.usable_page_size();
    let (local_size, needs_overflow) = overflow::local_payload_size(usable, key_bytes.len());
    let mut out = Vec::new();
    write_varint(key_bytes.len() as i64, &mut out);
    if !needs_overflow {
        out.extend_from_slice(key_bytes);
        return Ok(out);
    }
    let (local, rest) = key_bytes.split_at(local_size);
    out.extend_from_slice(local);
    let first = overflow::write_overflow_chain(pager, rest)?;
    out.extend_from_slice(&(first as u32).to_be_bytes());
    Ok(out)
}

fn decode_interior_cell(cell: &[u8]) -> (PageNum, Vec<u8>) {
    let mut c = IoCursor::new(cell);
    let left_child = c.read_u32::<BigEndian>().expect("cell too short") as PageNum;
    let (len, n) = read_varint(&cell[4..]);
    let key = cell[4 + n..4 + n + len as usize].to_vec();
    (left_child, key)
}

fn encode_interior_cell(left_child: PageNum, key_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<BigEndian>(left_child as u32).unwrap();
    write_varint(key_bytes.len() as i64, &mut out);
    out.extend_from_slice(key_bytes);
    out
}

pub struct IndexCursor {
    root_page: PageNum,
    stack: Vec<(PageNum, usize)>,
}

impl IndexCursor {
    pub fn new(root_page: PageNum) -> IndexCursor {
        IndexCursor { root_page, stack: Vec::new() }
    }

    pub fn first(&mut self, pager: &mut Pager) -> Result<()> {
        self.stack.clear();
        self.descend_leftmost(pager, self.root_page)
    }

    fn descend_leftmost(&mut self, pager: &mut Pager, mut pn: PageNum) -> Result<()> {
        loop {
            let page = pager.get(pn)?.to_vec();
            let off = header_offset(pn);
            let hdr = header::check_header(&page, off);
            if hdr.btree_page_type.is_leaf() {
                self.stack.push((pn, 0));
                return Ok(());
            }
            let page_size = pager.usable_page_size() as u32;
            let first_child = if hdr.num_cells > 0 {
                decode_interior_cell(cell::Iterator::new(&page, off, page_size).next().unwrap()).0
            } else {
                hdr.rightmost_pointer.expect("interior page needs a rightmost pointer") as PageNum
            };
            self.stack.push((pn, 1));
            pn = first_child;
        }
    }

    /// Returns the next `(record_bytes)` entry in ascending key order.
    pub fn next(&mut self, pager: &mut Pager) -> Result<Option<Vec<u8>>> {
        loop {
            let (pn, idx) = match self.stack.last() {
                Some(&t) => t,
                None => return Ok(None),
            };
            let page = pager.get(pn)?.to_vec();
            let off = header_offset(pn);
            let page_size = pager.usable_page_size() as u32;
            let hdr = header::check_header(&page, off);

            if hdr.btree_page_type == PageType::IndexLeaf {
                let cells: Vec<Vec<u8>> = cell::Iterator::new(&page, off, page_size).map(|c| c.to_vec()).collect();
                if idx < cells.len() {
                    self.stack.last_mut().unwrap().1 += 1;
                    return Ok(Some(read_leaf_key(pager, &cells[idx])));
                }
                self.stack.pop();
                continue;
            }

            let mut children: Vec<PageNum> = cell::Iterator::new(&page, off, page_size)
                .map(|c| decode_interior_cell(c).0)
                .collect();
            children.push(hdr.rightmost_pointer.expect("interior page needs a rightmost pointer") as PageNum);
            if idx < children.len() {
                self.stack.last_mut().unwrap().1 += 1;
                let child = children[idx];
                self.descend_leftmost(pager, child)?;
                continue;
            }
            self.stack.pop();
        }
    }

    /// Positions the cursor at the first entry `>= key_bytes` and returns it,
    /// if any (used to start a sargable index range scan).
    pub fn seek_ge(&mut self, pager: &mut Pager, key_bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut pn = self.root_page;
        loop {
            let page = pager.get(pn)?.to_vec();
            let off = header_offset(pn);
            let page_size = pager.usable_page_size() as u32;
            let hdr = header::check_header(&page, off);
            if hdr.btree_page_type.is_leaf() {
                break;
            }
            let mut next_pn = hdr.rightmost_pointer.expect("interior page needs a rightmost pointer") as PageNum;
            for c in cell::Iterator::new(&page, off, page_size) {
                let (child, sep_key) = decode_interior_cell(c);
                if super::compare_record_bytes(key_bytes, &sep_key) != std::cmp::Ordering::Greater {
                    next_pn = child;
                    break;
                }
            }
            pn = next_pn;
        }

        let page = pager.get(pn)?.to_vec();
        let off = header_offset(pn);
        let page_size = pager.usable_page_size() as u32;
        let cells: Vec<Vec<u8>> = cell::Iterator::new(&page, off, page_size).map(|c| c.to_vec()).collect();
        let mut found_idx = cells.len();
        for (i, c) in cells.iter().enumerate() {
            let k = read_leaf_key(pager, c);
            if super::compare_record_bytes(&k, key_bytes) != std::cmp::Ordering::Less {
                found_idx = i;
                break;
            }
        }
        self.stack.clear();
        self.stack.push((pn, found_idx));
        self.next(pager)
    }

    pub fn insert(&mut self, pager: &mut Pager, key_bytes: &[u8]) -> Result<()> {
        let mut path = vec![self.root_page];
        loop {
            let pn = *path.last().unwrap();
            let page = pager.get(pn)?.to_vec();
            let off = header_offset(pn);
            let page_size = pager.usable_page_size() as u32;
            let hdr = header::check_header(&page, off);
            if hdr.btree_page_type.is_leaf() {
                break;
            }
            let mut next_pn = hdr.rightmost_pointer.expect("interior page needs a rightmost pointer") as PageNum;
            for c in cell::Iterator::new(&page, off, page_size) {
                let (child, sep_key) = decode_interior_cell(c);
                if super::compare_record_bytes(key_bytes, &sep_key) != std::cmp::Ordering::Greater {
                    next_pn = child;
                    break;
                }
            }
            path.push(next_pn);
        }
        self.insert_into_leaf(pager, path, key_bytes)
    }

    fn write_leaf_page(&self, pager: &mut Pager, pn: PageNum, cells: &[Vec<u8>]) -> Result<()> {
        let off = header_offset(pn);
        let usable = pager.usable_page_size();
        let mut buf = vec![0u8; usable];
        if !cell::write_page_cells(&mut buf, off, PageType::IndexLeaf, None, cells) {
            return Err(Error::CellTooLarge);
        }
        let dest = pager.mutate(pn)?;
        dest.copy_from_slice(&buf);
        Ok(())
    }

    fn write_interior_page(&self, pager: &mut Pager, pn: PageNum, children: &[(PageNum, Vec<u8>)], rightmost: PageNum) -> Result<()> {
        let off = header_offset(pn);
        let usable = pager.usable_page_size();
        let mut buf = vec![0u8; usable];
        let cells: Vec<Vec<u8>> = children.iter().map(|(c, k)| encode_interior_cell(*c, k)).collect();
        if !cell::write_page_cells(&mut buf, off, PageType::IndexInterior, Some(rightmost as u32), &cells) {
            return Err(Error::CellTooLarge);
        }
        let dest = pager.mutate(pn)?;
        dest.copy_from_slice(&buf);
        Ok(())
    }

    fn insert_into_leaf(&mut self, pager: &mut Pager, mut path: Vec<PageNum>, key_bytes: &[u8]) -> Result<()> {
        let leaf_pn = path.pop().unwrap();
        let off = header_offset(leaf_pn);
        let page_size = pager.usable_page_size() as u32;
        let page = pager.get(leaf_pn)?.to_vec();

        let mut cells: Vec<Vec<u8>> = cell::Iterator::new(&page, off, page_size).map(|c| c.to_vec()).collect();
        let mut pos = cells.len();
        for (i, c) in cells.iter().enumerate() {
            let k = read_leaf_key(pager, c);
            if super::compare_record_bytes(&k, key_bytes) == std::cmp::Ordering::Greater {
                pos = i;
                break;
            }
        }
        let new_cell = encode_leaf_cell(pager, key_bytes)?;
        cells.insert(pos, new_cell);

        {
            let usable = pager.usable_page_size();
            let mut buf = vec![0u8; usable];
            if cell::write_page_cells(&mut buf, off, PageType::IndexLeaf, None, &cells) {
                let dest = pager.mutate(leaf_pn)?;
                dest.copy_from_slice(&buf);
                return Ok(());
            }
        }

        let mid = cells.len() / 2;
        let left_cells = cells[..mid].to_vec();
        let right_cells = cells[mid..].to_vec();
        let left_max_key = read_leaf_key(pager, left_cells.last().expect("split half is never empty"));

        if path.is_empty() {
            let new_left = pager.allocate()?;
            let new_right = pager.allocate()?;
            self.write_leaf_page(pager, new_left, &left_cells)?;
            self.write_leaf_page(pager, new_right, &right_cells)?;
            self.write_interior_page(pager, leaf_pn, &[(new_left, left_max_key)], new_right)?;
            return Ok(());
        }

        let new_sibling = pager.allocate()?;
        self.write_leaf_page(pager, leaf_pn, &left_cells)?;
        self.write_leaf_page(pager, new_sibling, &right_cells)?;
        self.insert_separator_into_ancestors(pager, path, leaf_pn, left_max_key, new_sibling)
    }

    fn insert_separator_into_ancestors(
        &mut self,
        pager: &mut Pager,
        mut ancestors: Vec<PageNum>,
        old_child: PageNum,
        separator_key: Vec<u8>,
        new_right_child: PageNum,
    ) -> Result<()> {
        let parent_pn = ancestors.pop().unwrap();
        let off = header_offset(parent_pn);
        let page_size = pager.usable_page_size() as u32;
        let page = pager.get(parent_pn)?.to_vec();
        let hdr = header::check_header(&page, off);
        let mut children: Vec<(PageNum, Vec<u8>)> =
            cell::Iterator::new(&page, off, page_size).map(decode_interior_cell).collect();
        let rightmost = hdr.rightmost_pointer.expect("interior page needs a rightmost pointer") as PageNum;

        let mut new_rightmost = rightmost;
        let mut replaced = false;
        for (child, _) in children.iter_mut() {
            if *child == old_child {
                *child = new_right_child;
                replaced = true;
                break;
            }
        }
        if !replaced {
            debug_assert_eq!(rightmost, old_child);
            new_rightmost = new_right_child;
        }

        let mut pos = children.len();
        for (i, (_, k)) in children.iter().enumerate() {
            if super::compare_record_bytes(&separator_key, k) == std::cmp::Ordering::Less {
                pos = i;
                break;
            }
        }
        children.insert(pos, (old_child, separator_key));

        match self.write_interior_page(pager, parent_pn, &children, new_rightmost) {
            Ok(()) => return Ok(()),
            Err(Error::CellTooLarge) => {}
            Err(e) => return Err(e),
        }

        let mid = children.len() / 2;
        let left_children = children[..mid].to_vec();
        let left_rightmost = children[mid].0;
        let promoted_key = children[mid].1.clone();
        let right_children = children[mid + 1..].to_vec();

        if ancestors.is_empty() {
            let new_left = pager.allocate()?;
            let new_right = pager.allocate()?;
            self.write_interior_page(pager, new_left, &left_children, left_rightmost)?;
            self.write_interior_page(pager, new_right, &right_children, new_rightmost)?;
            self.write_interior_page(pager, parent_pn, &[(new_left, promoted_key)], new_right)?;
            return Ok(());
        }

        let new_sibling = pager.allocate()?;
        self.write_interior_page(pager, parent_pn, &left_children, left_rightmost)?;
        self.write_interior_page(pager, new_sibling, &right_children, new_rightmost)?;
        self.insert_separator_into_ancestors(pager, ancestors, parent_pn, promoted_key, new_sibling)
    }

    /// Deletes the entry whose bytes exactly equal `key_bytes` (the rowid
    /// tiebreak embedded in the key makes this unambiguous even when the
    /// indexed column(s) alone are not unique).
    pub fn delete(&mut self, pager: &mut Pager, key_bytes: &[u8]) -> Result<bool> {
        let mut pn = self.root_page;
        loop {
            let page = pager.get(pn)?.to_vec();
            let off = header_offset(pn);
            let page_size = pager.usable_page_size() as u32;
            let hdr = header::check_header(&page, off);
            if hdr.btree_page_type.is_leaf() {
                break;
            }
            let mut next_pn = hdr.rightmost_pointer.expect("interior page needs a rightmost pointer") as PageNum;
            for c in cell::Iterator::new(&page, off, page_size) {
                let (child, sep_key) = decode_interior_cell(c);
                if super::compare_record_bytes(key_bytes, &sep_key) != std::cmp::Ordering::Greater {
                    next_pn = child;
                    break;
                }
            }
            pn = next_pn;
        }

        let off = header_offset(pn);
        let page_size = pager.usable_page_size() as u32;
        let page = pager.get(pn)?.to_vec();
        let mut cells: Vec<Vec<u8>> = cell::Iterator::new(&page, off, page_size).map(|c| c.to_vec()).collect();
        let mut found = None;
        for (i, c) in cells.iter().enumerate() {
            if read_leaf_key(pager, c) == key_bytes {
                found = Some(i);
                break;
            }
        }
        let idx = match found {
            Some(i) => i,
            None => return Ok(false),
        };
        let (_, _, overflow_page) = decode_leaf_cell_header(&cells[idx]);
        if let Some(first) = overflow_page {
            overflow::release_chain(pager, first as usize)?;
        }
        cells.remove(idx);
        self.write_leaf_page(pager, pn, &cells)?;
        Ok(true)
    }
}

/// Bootstraps a brand-new, empty index b-tree root page.
pub fn init_root_page(pager: &mut Pager, pn: PageNum) -> crate::pager::Result<()> {
    let off = header_offset(pn);
    let usable = pager.usable_page_size();
    header::write_leaf_header(pager.mutate(pn)?, PageType::IndexLeaf, off, usable - off);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::OpenOptions;

    fn new_index(pager: &mut Pager) -> PageNum {
        pager.begin_transaction().unwrap();
        let pn = pager.allocate().unwrap();
        init_root_page(pager, pn).unwrap();
        pager.commit().unwrap();
        pn
    }

    fn key(col: i64, rowid: i64) -> Vec<u8> {
        crate::record::encode_record(&[crate::sql_value::SqlValue::Int(col), crate::sql_value::SqlValue::Int(rowid)])
    }

    #[test]
    fn insert_then_scan_in_order() {
        let mut pager = crate::pager::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        let root = new_index(&mut pager);
        let mut cur = IndexCursor::new(root);

        pager.begin_transaction().unwrap();
        for (col, rowid) in [(30, 3), (10, 1), (20, 2)] {
            cur.insert(&mut pager, &key(col, rowid)).unwrap();
        }
        pager.commit().unwrap();

        let mut scan = IndexCursor::new(root);
        scan.first(&mut pager).unwrap();
        let mut seen = Vec::new();
        while let Some(k) = scan.next(&mut pager).unwrap() {
            seen.push(k);
        }
        assert_eq!(seen, vec![key(10, 1), key(20, 2), key(30, 3)]);
    }

    #[test]
    fn delete_removes_entry() {
        let mut pager = crate::pager::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        let root = new_index(&mut pager);
        let mut cur = IndexCursor::new(root);

        pager.begin_transaction().unwrap();
        cur.insert(&mut pager, &key(10, 1)).unwrap();
        cur.insert(&mut pager, &key(20, 2)).unwrap();
        assert!(cur.delete(&mut pager, &key(10, 1)).unwrap());
        pager.commit().unwrap();

        let mut scan = IndexCursor::new(root);
        scan.first(&mut pager).unwrap();
        assert_eq!(scan.next(&mut pager).unwrap(), Some(key(20, 2)));
        assert_eq!(scan.next(&mut pager).unwrap(), None);
    }
}
