//! Freelist trunk page parsing.
//!
//! A trunk page's first 4 bytes point to the next trunk (0 if none), the next
//! 4 bytes hold the number of leaf entries on this trunk, followed by an array
//! of 4-byte freelist leaf page numbers. [`Pager::allocate`](crate::pager::Pager::allocate)
//! and [`Pager::release`](crate::pager::Pager::release) use these pure helpers
//! to read and rebuild a trunk's on-page representation.

use byteorder::{BigEndian, ByteOrder};

pub const TRUNK_HEADER_BYTES: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct Trunk {
    pub next_trunk: u32,
    pub leaves: Vec<u32>,
}

impl Trunk {
    pub fn empty() -> Self {
        Trunk {
            next_trunk: 0,
            leaves: Vec::new(),
        }
    }

    pub fn parse(buf: &[u8]) -> Trunk {
        let next_trunk = BigEndian::read_u32(&buf[0..4]);
        let count = BigEndian::read_u32(&buf[4..8]) as usize;
        let mut leaves = Vec::with_capacity(count);
        for i in 0..count {
            let off = TRUNK_HEADER_BYTES + i * 4;
            if off + 4 > buf.len() {
                break;
            }
            leaves.push(BigEndian::read_u32(&buf[off..off + 4]));
        }
        Trunk { next_trunk, leaves }
    }

    /// Writes this trunk's representation into `buf`, zeroing the remainder
    /// of the page (trunk pages carry no other payload).
    pub fn write_into(&self, buf: &mut [u8]) {
        buf.fill(0);
        BigEndian::write_u32(&mut buf[0..4], self.next_trunk);
        BigEndian::write_u32(&mut buf[4..8], self.leaves.len() as u32);
        for (i, leaf) in self.leaves.iter().enumerate() {
            let off = TRUNK_HEADER_BYTES + i * 4;
            if off + 4 > buf.len() {
                break;
            }
            BigEndian::write_u32(&mut buf[off..off + 4], *leaf);
        }
    }

    pub fn max_leaves(page_size: usize) -> usize {
        (page_size - TRUNK_HEADER_BYTES) / 4
    }

    pub fn is_full(&self, page_size: usize) -> bool {
        self.leaves.len() >= Self::max_leaves(page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let trunk = Trunk {
            next_trunk: 7,
            leaves: vec![10, 11, 12],
        };
        let mut buf = vec![0xAAu8; 512];
        trunk.write_into(&mut buf);
        let back = Trunk::parse(&buf);
        assert_eq!(back.next_trunk, 7);
        assert_eq!(back.leaves, vec![10, 11, 12]);
    }

    #[test]
    fn max_leaves_accounts_for_header() {
        assert_eq!(Trunk::max_leaves(512), (512 - 8) / 4);
    }
}
