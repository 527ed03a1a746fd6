//! Reads and writes the 8- or 12-byte b-tree page header.
//!
//! A b-tree page is divided, in order: the 100-byte DB header (page 1 only),
//! the b-tree page header, the cell-pointer array, unallocated space, the
//! cell-content area, and the reserved region (handled by the pager, invisible
//! here).

use super::PageType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Seek, SeekFrom, Write};

#[derive(Debug, Clone)]
pub struct Header {
    pub btree_page_type: PageType,
    pub freeblock_start: u32,
    pub num_cells: u32,
    pub cell_content_start: u32,
    pub fragmented_free_bytes: u8,
    pub rightmost_pointer: Option<u32>,
}

impl Header {
    pub fn byte_size(&self) -> usize {
        self.btree_page_type.header_bytes()
    }
}

pub fn check_header(page: &[u8], non_btree_header_bytes: usize) -> Header {
    let mut c = Cursor::new(page);
    if non_btree_header_bytes > 0 {
        c.seek(SeekFrom::Current(non_btree_header_bytes as i64))
            .expect("Should have seeked past db file header.");
    }
    let btree_page_type =
        PageType::from_byte(c.read_u8().expect("Should have read btree header"))
            .expect("Invalid btree page type");
    let freeblock_start: u32 = c.read_u16::<BigEndian>().expect("Should have read btree header") as u32;
    let num_cells: u32 = c.read_u16::<BigEndian>().expect("Should have read btree header") as u32;
    let cell_content_start: u32 = match c.read_u16::<BigEndian>().expect("Should have read btree header") {
        0 => 65536,
        x => x as u32,
    };
    let fragmented_free_bytes = c.read_u8().expect("Should have read btree header");
    let rightmost_pointer = match btree_page_type {
        PageType::IndexInterior | PageType::TableInterior => {
            Some(c.read_u32::<BigEndian>().expect("Should have read rightmost pointer"))
        }
        PageType::IndexLeaf | PageType::TableLeaf => None,
    };

    Header {
        btree_page_type,
        freeblock_start,
        num_cells,
        cell_content_start,
        fragmented_free_bytes,
        rightmost_pointer,
    }
}

/// Writes `hdr` at `page[non_btree_header_bytes..]`.
pub fn write_header(page: &mut [u8], non_btree_header_bytes: usize, hdr: &Header) {
    let mut c = Cursor::new(&mut page[non_btree_header_bytes..]);
    c.write_u8(hdr.btree_page_type.to_byte()).unwrap();
    c.write_u16::<BigEndian>(hdr.freeblock_start as u16).unwrap();
    c.write_u16::<BigEndian>(hdr.num_cells as u16).unwrap();
    let ccs = if hdr.cell_content_start == 65536 {
        0
    } else {
        hdr.cell_content_start as u16
    };
    c.write_u16::<BigEndian>(ccs).unwrap();
    c.write_u8(hdr.fragmented_free_bytes).unwrap();
    if let Some(rm) = hdr.rightmost_pointer {
        c.write_u32::<BigEndian>(rm).unwrap();
    }
}

/// Convenience used when bootstrapping a brand-new, empty leaf page: writes a
/// header with zero cells and the content area starting at the end of the
/// usable page (nothing allocated yet).
pub fn write_leaf_header(page: &mut [u8], page_type: PageType, non_btree_header_bytes: usize, usable_page_size: usize) {
    let hdr = Header {
        btree_page_type: page_type,
        freeblock_start: 0,
        num_cells: 0,
        cell_content_start: usable_page_size as u32,
        fragmented_free_bytes: 0,
        rightmost_pointer: None,
    };
    write_header(page, non_btree_header_bytes, &hdr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_leaf_header() {
        let mut page = vec![0u8; 512];
        write_leaf_header(&mut page, PageType::TableLeaf, 0, 512);
        let hdr = check_header(&page, 0);
        assert!(matches!(hdr.btree_page_type, PageType::TableLeaf));
        assert_eq!(hdr.num_cells, 0);
        assert_eq!(hdr.cell_content_start, 512);
        assert!(hdr.rightmost_pointer.is_none());
    }

    #[test]
    fn round_trips_interior_header_with_rightmost_pointer() {
        let mut page = vec![0u8; 512];
        let hdr = Header {
            btree_page_type: PageType::TableInterior,
            freeblock_start: 0,
            num_cells: 3,
            cell_content_start: 400,
            fragmented_free_bytes: 0,
            rightmost_pointer: Some(42),
        };
        write_header(&mut page, 0, &hdr);
        let back = check_header(&page, 0);
        assert_eq!(back.num_cells, 3);
        assert_eq!(back.rightmost_pointer, Some(42));
    }
}
