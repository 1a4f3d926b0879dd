//! Stable, non-cryptographic hashing for rollout gating and variant bucketing.
//!
//! MurmurHash3 (x86, 32-bit) over the UTF-8 bytes of the key. The output only
//! depends on the key bytes, so every process and platform in a deployment
//! buckets the same unit identically.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// MurmurHash3 x86_32 of `data` with the given seed.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k |= (*byte as u32) << (8 * i);
        }
        h ^= mix_k(k);
    }

    h ^= data.len() as u32;
    fmix32(h)
}

#[inline]
fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

/// Hash `key` into `[0, modulus)`. A zero modulus maps everything to 0.
pub fn hash(key: &str, modulus: u64) -> u64 {
    if modulus == 0 {
        return 0;
    }
    u64::from(murmur3_32(key.as_bytes(), 0)) % modulus
}

/// Rollout gate on a fixed 0–100 scale, independent of the variant count.
///
/// Percentage 0 always excludes. Buckets `0..=percentage` are admitted, so 99
/// and above admit every key.
pub fn rollout(key: &str, percentage: u32) -> bool {
    percentage > 0 && hash(key, 100) <= u64::from(percentage)
}
