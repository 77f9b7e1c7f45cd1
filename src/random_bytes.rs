//! A pre-initialized pool of random bytes used to fill SET values so the
//! hot path never allocates or fills memory per operation.
//!
//! Grounded on the teacher's `tools::util::gen_rand_bytes`, generalized from
//! a one-shot helper into a reusable pool that miss-fill and synthetic SETs
//! sample a random window from (spec §4.4).

use rand::Rng;

pub const POOL_SIZE: usize = 2 * 1024 * 1024;

pub struct RandomBytePool {
    data: Vec<u8>,
}

impl RandomBytePool {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut data = vec![0u8; POOL_SIZE];
        rng.fill(data.as_mut_slice());
        Self { data }
    }

    /// Returns a `len`-byte slice starting at a uniformly chosen offset
    /// that still fits inside the pool. `len` must be `<= POOL_SIZE`.
    pub fn sample(&self, rng: &mut dyn rand::RngCore, len: usize) -> &[u8] {
        debug_assert!(len <= self.data.len());
        let max_start = self.data.len() - len;
        let start = if max_start == 0 { 0 } else { rng.gen_range(0..=max_start) };
        &self.data[start..start + len]
    }
}

impl Default for RandomBytePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_has_requested_length() {
        let pool = RandomBytePool::new();
        let mut rng = rand::thread_rng();
        let s = pool.sample(&mut rng, 128);
        assert_eq!(s.len(), 128);
    }

    #[test]
    fn sample_at_full_pool_size_is_deterministic_offset() {
        let pool = RandomBytePool::new();
        let mut rng = rand::thread_rng();
        let s = pool.sample(&mut rng, POOL_SIZE);
        assert_eq!(s.len(), POOL_SIZE);
    }
}
