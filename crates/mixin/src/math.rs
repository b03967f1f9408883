//! Multiplier arithmetic for obfuscated integer fields.
//!
//! A field obfuscated with multiplier `m` stores `v * m⁻¹` and decodes with
//! `stored * m`, both modulo 2^32 or 2^64. Only odd multipliers are units
//! of those rings.

/// Inverse of `a` modulo `2^bits` by the extended Euclidean algorithm.
fn inverse_mod_pow2(a: i128, bits: u32) -> Option<i128> {
    let modulus = 1i128 << bits;
    let (mut old_r, mut r) = (a.rem_euclid(modulus), modulus);
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }
    (old_r == 1).then(|| old_s.rem_euclid(modulus))
}

/// The inverse of `m` modulo 2^32, `None` if `m` is even.
pub fn inverse_i32(m: i32) -> Option<i32> {
    inverse_mod_pow2(i128::from(m), 32).map(|inv| inv as u32 as i32)
}

/// The inverse of `m` modulo 2^64, `None` if `m` is even.
pub fn inverse_i64(m: i64) -> Option<i64> {
    inverse_mod_pow2(i128::from(m), 64).map(|inv| inv as u64 as i64)
}

/// Value stored for `value` under multiplier `m`.
pub fn encode_i32(value: i32, m: i32) -> Option<i32> {
    inverse_i32(m).map(|inv| value.wrapping_mul(inv))
}

/// Value read back from `stored` under multiplier `m`.
pub const fn decode_i32(stored: i32, m: i32) -> i32 {
    stored.wrapping_mul(m)
}

pub fn encode_i64(value: i64, m: i64) -> Option<i64> {
    inverse_i64(m).map(|inv| value.wrapping_mul(inv))
}

pub const fn decode_i64(stored: i64, m: i64) -> i64 {
    stored.wrapping_mul(m)
}
