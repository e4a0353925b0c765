//! Proof of Work
//!
//! A header is valid when its hash, read as a big-endian 256-bit integer,
//! is below 2^(256 - difficulty_bits). That holds exactly when the top
//! `difficulty_bits` bits of the hash are zero.

use crate::types::*;

/// CheckProofOfWork: ℋ → {true, false}
///
/// Formula: int(SHA256d(header)) < 2^(256 - header.difficulty_bits)
pub fn verify(header: &BlockHeader) -> crate::error::Result<bool> {
    Ok(meets_target(&header.hash()?, header.difficulty_bits))
}

/// Search nonces upwards from 0 until the header satisfies its target.
///
/// Unbounded: terminates because configured difficulty is low. On return
/// `header.nonce` holds the winning nonce.
pub fn mine(header: &mut BlockHeader) -> crate::error::Result<(Hash, u64)> {
    header.nonce = 0;
    loop {
        let hash = header.hash()?;
        if meets_target(&hash, header.difficulty_bits) {
            return Ok((hash, header.nonce));
        }
        header.nonce += 1;
    }
}

/// hash < 2^(256 - bits)
pub fn meets_target(hash: &Hash, bits: u32) -> bool {
    if bits == 0 {
        // 2^256 exceeds every hash
        return true;
    }
    leading_zero_bits(hash) >= bits
}

fn leading_zero_bits(hash: &Hash) -> u32 {
    let mut zeros = 0;
    for byte in hash {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}
