//! # Hashing
//!
//! Two hash functions with different jobs:
//!
//! - [`RollingHash`]: a seeded, incremental 32-bit hash. Bytes may be fed in
//!   any number of `add()` calls with arbitrary boundaries; the result only
//!   depends on the seed and the concatenated bytes. Used as the input of
//!   bloom filter membership bits.
//! - [`murmur3_x64_128`]: the 128-bit MurmurHash3 (x64 variant). Row keys are
//!   computed with it under a single cluster-wide seed, see
//!   `config::DEFAULT_KEY_SEED`.
//!
//! Both are bit-exact and platform independent: words are always read as
//! little-endian regardless of the host byte order.

mod murmur3;
mod rolling;

pub use murmur3::{murmur3_x64_128, RowKey};
pub use rolling::{hash32, RollingHash};

pub(crate) const C1: u64 = 0x87c3_7b91_1142_53d5;
pub(crate) const C2: u64 = 0x4cf5_ad43_2745_937f;

/// Final avalanche step shared by both hashes.
#[inline]
pub(crate) fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}
