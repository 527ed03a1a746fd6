//! Table b-tree leaf cells: `varint payload_len | varint rowid | local payload
//! bytes | optional 4-byte first-overflow-page-number`.

use crate::pager::Pager;
use crate::varint::{read_varint, write_varint};

use super::overflow;
use super::RowId;

/// One decoded table-leaf cell: its key, and either the full payload (when it
/// fit locally) or the bytes needed to fetch the rest from the overflow chain.
pub struct LeafCell {
    pub rowid: RowId,
    pub total_payload_len: usize,
    pub local_bytes_range: std::ops::Range<usize>,
    pub overflow_page: Option<u32>,
}

/// Parses the fixed-size header of a table-leaf cell, returning the decoded
/// fields and the byte ranges needed to read the payload. Whether the cell
/// carries an overflow pointer is determined directly from how many bytes
/// are actually present versus `payload_len`, so no page-size context is
/// needed here.
pub fn decode_cell_header(cell: &[u8]) -> LeafCell {
    let (payload_len, n1) = read_varint(cell);
    let (rowid, n2) = read_varint(&cell[n1..]);
    let offset = n1 + n2;
    let remaining = cell.len() - offset;
    let (local_bytes_range, overflow_page) = if remaining == payload_len as usize {
        (offset..cell.len(), None)
    } else {
        let local_len = remaining - 4;
        let first = u32::from_be_bytes(cell[offset + local_len..offset + local_len + 4].try_into().unwrap());
        (offset..offset + local_len, Some(first))
    };
    LeafCell {
        rowid,
        total_payload_len: payload_len as usize,
        local_bytes_range,
        overflow_page,
    }
}

/// Reads the full record payload for a table-leaf cell, following the
/// overflow chain if needed.
pub fn read_payload(pager: &mut Pager, cell: &[u8]) -> Vec<u8> {
    let hdr = decode_cell_header(cell);
    let local = &cell[hdr.local_bytes_range.clone()];
    match hdr.overflow_page {
        None => local.to_vec(),
        Some(first) => overflow::read_full_payload(pager, local, Some(first as usize), hdr.total_payload_len),
    }
}

/// Encodes a table-leaf cell for `rowid` holding `record_bytes`, writing any
/// overflow pages needed through `pager` (which must be inside a writable
/// transaction).
pub fn encode_cell(pager: &mut Pager, rowid: RowId, record_bytes: &[u8]) -> crate::pager::Result<Vec<u8>> {
    let usable = pager.usable_page_size();
    let (local_size, needs_overflow) = overflow::local_payload_size(usable, record_bytes.len());

    let mut out = Vec::new();
    write_varint(record_bytes.len() as i64, &mut out);
    write_varint(rowid, &mut out);

    if !needs_overflow {
        out.extend_from_slice(record_bytes);
        return Ok(out);
    }

    let (local, rest) = record_bytes.split_at(local_size);
    out.extend_from_slice(local);
    let first_overflow = overflow::write_overflow_chain(pager, rest)?;
    out.extend_from_slice(&(first_overflow as u32).to_be_bytes());
    Ok(out)
}

/// Releases any overflow chain referenced by a table-leaf cell.
pub fn release_cell_overflow(pager: &mut Pager, cell: &[u8]) -> crate::pager::Result<()> {
    let hdr = decode_cell_header(cell);
    if let Some(first) = hdr.overflow_page {
        overflow::release_chain(pager, first as usize)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::OpenOptions;

    #[test]
    fn encode_then_decode_small_payload_stays_local() {
        let mut pager = crate::pager::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        pager.begin_transaction().unwrap();
        let record = vec![1u8, 2, 3, 4];
        let cell = encode_cell(&mut pager, 7, &record).unwrap();
        pager.commit().unwrap();

        let hdr = decode_cell_header(&cell);
        assert_eq!(hdr.rowid, 7);
        assert!(hdr.overflow_page.is_none());
        assert_eq!(&cell[hdr.local_bytes_range], &record[..]);
    }

    #[test]
    fn encode_then_decode_large_payload_round_trips_through_overflow() {
        let mut pager = crate::pager::create_in_memory(&OpenOptions { writable: true, ..Default::default() }).unwrap();
        pager.begin_transaction().unwrap();
        let record: Vec<u8> = (0..5000u32).map(|i| (i % 250) as u8).collect();
        let cell = encode_cell(&mut pager, 42, &record).unwrap();
        pager.commit().unwrap();

        let read_back = read_payload(&mut pager, &cell);
        assert_eq!(read_back, record);
    }
}
