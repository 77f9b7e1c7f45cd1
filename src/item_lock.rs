//! Optional cross-connection serialization for miss-fill against the same
//! key (spec §5, §9 "Item-lock table"). Disabled by default; present as a
//! capability, not wired into the hot path unless a run opts in.

use std::sync::Mutex;

pub struct ItemLockTable {
    mask: u64,
    locks: Vec<Mutex<()>>,
}

impl ItemLockTable {
    /// `size_pow2` is rounded up to the next power of two, matching the
    /// original's power-of-two-sized mutex array.
    pub fn new(size_pow2: usize) -> Self {
        let size = size_pow2.next_power_of_two().max(1);
        let locks = (0..size).map(|_| Mutex::new(())).collect();
        Self { mask: (size - 1) as u64, locks }
    }

    pub fn lock_for(&self, key_hash: u64) -> std::sync::MutexGuard<'_, ()> {
        let idx = (key_hash & self.mask) as usize;
        self.locks[idx].lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_size_up_to_power_of_two() {
        let table = ItemLockTable::new(10);
        assert_eq!(table.mask, 15);
    }

    #[test]
    fn same_hash_maps_to_same_lock() {
        let table = ItemLockTable::new(16);
        let _g1 = table.lock_for(42);
        drop(_g1);
        let _g2 = table.lock_for(42);
    }
}
