//! Overflow page chains: used when a cell's payload exceeds the local budget.
//!
//! Each overflow page stores a 4-byte big-endian "next page" pointer (0 means
//! end of chain) followed by payload bytes filling the rest of the usable page.

use crate::pager::{PageNum, Pager};

/// Given a usable page size and a record's total payload length, computes
/// `(local_size, needs_overflow)` per SQLite's payload-overflow formula for
/// table b-tree leaf cells (the leaf-payload-fraction case: min local = 32).
pub fn local_payload_size(usable_page_size: usize, payload_len: usize) -> (usize, bool) {
    let u = usable_page_size;
    let max_local = u - 35;
    if payload_len <= max_local {
        return (payload_len, false);
    }
    let min_local = (u - 12) * 32 / 255 - 23;
    let k = min_local + (payload_len - min_local) % (u - 4);
    let local = if k <= max_local { k } else { min_local };
    (local, true)
}

/// Reads the full payload given the bytes already local to the cell and (if
/// `first_overflow_page` is `Some`) walks the overflow chain for the rest.
pub fn read_full_payload(
    pager: &mut Pager,
    local_bytes: &[u8],
    first_overflow_page: Option<PageNum>,
    total_len: usize,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(local_bytes);
    let mut next = first_overflow_page;
    while let Some(pn) = next {
        if out.len() >= total_len || pn == 0 {
            break;
        }
        let page = match pager.get(pn) {
            Ok(p) => p,
            Err(_) => break,
        };
        let next_ptr = u32::from_be_bytes(page[0..4].try_into().unwrap());
        let remaining = total_len - out.len();
        let take = remaining.min(page.len() - 4);
        out.extend_from_slice(&page[4..4 + take]);
        next = if next_ptr == 0 { None } else { Some(next_ptr as PageNum) };
    }
    out
}

/// Writes `overflow_bytes` across a freshly allocated chain of overflow
/// pages, returning the first page number in the chain.
pub fn write_overflow_chain(pager: &mut Pager, overflow_bytes: &[u8]) -> crate::pager::Result<PageNum> {
    let usable = pager.usable_page_size();
    let per_page = usable - 4;
    let mut page_numbers = Vec::new();
    let mut offset = 0;
    while offset < overflow_bytes.len() {
        page_numbers.push(pager.allocate()?);
        offset += per_page;
    }
    let mut offset = 0;
    for (i, pn) in page_numbers.iter().enumerate() {
        let end = (offset + per_page).min(overflow_bytes.len());
        let chunk = &overflow_bytes[offset..end];
        let next = page_numbers.get(i + 1).copied().unwrap_or(0);
        let buf = pager.mutate(*pn)?;
        buf[0..4].copy_from_slice(&(next as u32).to_be_bytes());
        buf[4..4 + chunk.len()].copy_from_slice(chunk);
        offset = end;
    }
    Ok(*page_numbers.first().unwrap_or(&0))
}

/// Releases every page in an overflow chain back to the freelist.
pub fn release_chain(pager: &mut Pager, first: PageNum) -> crate::pager::Result<()> {
    let mut next = Some(first);
    while let Some(pn) = next {
        if pn == 0 {
            break;
        }
        let page = pager.get(pn)?;
        let next_ptr = u32::from_be_bytes(page[0..4].try_into().unwrap());
        pager.release(pn)?;
        next = if next_ptr == 0 { None } else { Some(next_ptr as PageNum) };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::OpenOptions;

    #[test]
    fn local_payload_size_no_overflow_for_small_payload() {
        let (local, overflows) = local_payload_size(4096, 50);
        assert_eq!(local, 50);
        assert!(!overflows);
    }

    #[test]
    fn local_payload_size_overflows_for_large_payload() {
        let (local, overflows) = local_payload_size(4096, 10_000);
        assert!(overflows);
        assert!(local < 10_000);
    }

    #[test]
    fn write_then_read_overflow_chain_round_trips() {
        let mut pager = crate::pager::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        pager.begin_transaction().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let first = write_overflow_chain(&mut pager, &data).unwrap();
        pager.commit().unwrap();
        let read_back = read_full_payload(&mut pager, &[], Some(first), data.len());
        assert_eq!(read_back, data);
    }
}
