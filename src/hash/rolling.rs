//! # Rolling Hash
//!
//! A seeded 32-bit hash consuming input in 8-byte words. Up to 7 trailing
//! bytes are carried between `add()` calls, so
//!
//! ```text
//! add(b"abc"); add(b"defghij")   ==   add(b"abcdefghij")
//! ```
//!
//! `get()` does not consume the pending bytes: more data may be added after
//! reading an intermediate result.

use super::{fmix64, C1, C2};

const WORD: usize = 8;

#[derive(Debug, Clone)]
pub struct RollingHash {
    seed: u32,
    state: u64,
    total_len: u64,
    pending: [u8; WORD],
    pending_len: usize,
}

#[inline]
fn scramble(word: u64) -> u64 {
    word.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix(state: u64, word: u64) -> u64 {
    (state ^ scramble(word))
        .rotate_left(27)
        .wrapping_mul(5)
        .wrapping_add(0x52dc_e729)
}

impl RollingHash {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            state: seed as u64,
            total_len: 0,
            pending: [0; WORD],
            pending_len: 0,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Number of bytes added since creation or the last `reset()`.
    pub fn len(&self) -> u64 {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.seed);
    }

    pub fn add(&mut self, mut data: &[u8]) {
        self.total_len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (WORD - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];

            if self.pending_len < WORD {
                return;
            }

            self.state = mix(self.state, u64::from_le_bytes(self.pending));
            self.pending_len = 0;
        }

        let mut words = data.chunks_exact(WORD);
        for word in &mut words {
            // INVARIANT: chunks_exact yields WORD-sized slices
            self.state = mix(self.state, u64::from_le_bytes(word.try_into().unwrap()));
        }

        let rest = words.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    pub fn get(&self) -> u32 {
        let mut h = self.state;

        if self.pending_len > 0 {
            let mut tail = [0u8; WORD];
            tail[..self.pending_len].copy_from_slice(&self.pending[..self.pending_len]);
            h ^= scramble(u64::from_le_bytes(tail));
        }

        h ^= self.total_len;
        h = fmix64(h);
        (h ^ (h >> 32)) as u32
    }
}

/// One-shot form of [`RollingHash`].
pub fn hash32(seed: u32, data: &[u8]) -> u32 {
    let mut hash = RollingHash::new(seed);
    hash.add(data);
    hash.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_input_same_output() {
        assert_eq!(hash32(1, b"row key"), hash32(1, b"row key"));
    }

    #[test]
    fn known_outputs() {
        assert_eq!(hash32(0, b"The quick brown fox jumps over the lazy dog"), 0xceed_9b5e);
        assert_eq!(hash32(42, b""), 0x0f4a_20ac);
        assert_eq!(hash32(0x5eed, b"abcdefghij"), 0xba3e_bac6);
    }

    #[test]
    fn seed_changes_output() {
        assert_ne!(hash32(1, b"row key"), hash32(2, b"row key"));
    }

    #[test]
    fn length_is_part_of_the_hash() {
        assert_ne!(hash32(0, b""), hash32(0, &[0]));
        assert_ne!(hash32(0, &[0]), hash32(0, &[0, 0]));
    }

    #[test]
    fn split_inside_a_word_matches_single_add() {
        let data = b"abcdefghijklmnopqrstuvwxyz";

        let mut split = RollingHash::new(42);
        split.add(&data[..3]);
        split.add(&data[3..10]);
        split.add(&data[10..11]);
        split.add(&data[11..]);

        assert_eq!(split.get(), hash32(42, data));
    }

    #[test]
    fn get_does_not_consume_pending_bytes() {
        let mut hash = RollingHash::new(9);
        hash.add(b"abc");
        let _ = hash.get();
        hash.add(b"defghijk");

        assert_eq!(hash.get(), hash32(9, b"abcdefghijk"));
        assert_eq!(hash.len(), 11);
    }

    #[test]
    fn reset_keeps_seed() {
        let mut hash = RollingHash::new(5);
        hash.add(b"garbage");
        hash.reset();
        hash.add(b"value");

        assert!(!hash.is_empty());
        assert_eq!(hash.seed(), 5);
        assert_eq!(hash.get(), hash32(5, b"value"));
    }

    proptest! {
        #[test]
        fn chunking_never_changes_the_result(
            seed in any::<u32>(),
            data in proptest::collection::vec(any::<u8>(), 0..200),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
        ) {
            let mut bounds: Vec<usize> = cuts
                .into_iter()
                .map(|c| if data.is_empty() { 0 } else { c % (data.len() + 1) })
                .collect();
            bounds.push(0);
            bounds.push(data.len());
            bounds.sort_unstable();

            let mut chunked = RollingHash::new(seed);
            for pair in bounds.windows(2) {
                chunked.add(&data[pair[0]..pair[1]]);
            }

            prop_assert_eq!(chunked.get(), hash32(seed, &data));
        }
    }
}
