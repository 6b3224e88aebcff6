//! Deterministic bucketing hash.
//!
//! Entity ids are mapped to a float in `[0, 1]` with MurmurHash3 (x64, 128-bit
//! variant, seed 0). Only the first 64-bit half is used. The mapping must stay
//! bit-for-bit identical across releases and across implementations in other
//! languages, otherwise previously bucketed entities would move between arms.

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// Largest unsigned 64-bit value, as the divisor for [`hash_id`].
const MAX_U64_F: f64 = u64::MAX as f64;

/// Hash a string id to a float in `[0, 1]`.
///
/// # Examples
///
/// ```
/// use tollgate_expr::hash_id;
///
/// assert_eq!(hash_id("foo"), 0.8845447504445093);
/// ```
pub fn hash_id(s: &str) -> f64 {
    let (h1, _) = murmur3_x64_128(s.as_bytes(), 0);
    h1 as f64 / MAX_U64_F
}

/// MurmurHash3 x64 128-bit, returning both 64-bit halves.
pub fn murmur3_x64_128(data: &[u8], seed: u32) -> (u64, u64) {
    let mut h1 = u64::from(seed);
    let mut h2 = u64::from(seed);

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let mut k1 = read_u64(&block[..8]);
        let mut k2 = read_u64(&block[8..]);

        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        let k2 = read_u64(&tail[8..]);
        h2 ^= k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
    }
    if !tail.is_empty() {
        let k1 = read_u64(&tail[..tail.len().min(8)]);
        h1 ^= k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

/// Little-endian read of up to eight bytes.
fn read_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)))
}

fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}
