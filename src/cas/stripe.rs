//! Striped in-process lock for CAS ref-count coordination (spec.md §4.1).
//! A fixed-size array of mutexes indexed by hash; bounded memory, predictable
//! distribution, contention localised per hash prefix. All coordination is
//! in-process and never touches disk, following the teacher's own use of
//! `parking_lot::Mutex` for in-memory coordination (`crdt/src/*.rs`).

use parking_lot::{Mutex, MutexGuard};

pub struct StripeLock {
    locks: Vec<Mutex<()>>,
}

impl StripeLock {
    /// `count` should be a power of two; non-power-of-two values still work
    /// but lose the fast modulo distribution property.
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            locks: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    fn index_for(&self, hash_hex: &str) -> usize {
        let tail = &hash_hex[hash_hex.len().saturating_sub(4)..];
        let n = u32::from_str_radix(tail, 16).unwrap_or(0) as usize;
        n % self.locks.len()
    }

    /// Acquires the stripe lock for `hash_hex`. Held only across the
    /// sidecar read-modify-write cycle, never across blob I/O.
    pub fn lock(&self, hash_hex: &str) -> MutexGuard<'_, ()> {
        self.locks[self.index_for(hash_hex)].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_hash_maps_to_same_stripe() {
        let s = StripeLock::new(64);
        assert_eq!(s.index_for("abcd1234"), s.index_for("ffff1234"));
    }

    #[test]
    fn index_within_bounds() {
        let s = StripeLock::new(64);
        for h in ["0000", "ffff", "1234abcd", "deadbeef"] {
            assert!(s.index_for(h) < 64);
        }
    }
}
