//! Proof-of-work: fixed-difficulty nonce search and validation.
//!
//! The pre-image for a block is
//! `prev_hash ‖ merkle_root ‖ timestamp_be64 ‖ difficulty_be64 ‖ nonce_be64`
//! — every consensus-visible field of the header. A hash is valid when,
//! read as a big-endian integer, it is strictly below
//! `2^(256 − DIFFICULTY_BITS)`, i.e. its top `DIFFICULTY_BITS` bits are zero.

use tracing::debug;

use crate::constants::DIFFICULTY_BITS;
use crate::crypto::sha256;
use crate::error::{PowError, PyriteError};
use crate::types::{Block, Hash256};

/// The nonce search stops here; the counter never wraps.
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Assemble the PoW pre-image for `block` at the given nonce.
fn preimage(block: &Block, merkle_root: &Hash256, nonce: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(32 + 32 + 8 * 3);
    data.extend_from_slice(block.prev_hash.as_bytes());
    data.extend_from_slice(merkle_root.as_bytes());
    data.extend_from_slice(&block.timestamp.to_be_bytes());
    data.extend_from_slice(&(DIFFICULTY_BITS as u64).to_be_bytes());
    data.extend_from_slice(&nonce.to_be_bytes());
    data
}

/// Whether `hash` carries at least `bits` leading zero bits.
pub fn meets_difficulty(hash: &Hash256, bits: u32) -> bool {
    let mut remaining = bits;
    for byte in hash.as_bytes() {
        if remaining == 0 {
            return true;
        }
        if remaining >= 8 {
            if *byte != 0 {
                return false;
            }
            remaining -= 8;
        } else {
            return byte.leading_zeros() >= remaining;
        }
    }
    remaining == 0
}

/// Search nonces from zero until the difficulty target is met.
///
/// Returns the winning `(nonce, hash)` pair. Exhausting the counter is a
/// [`PowError::NoSolutionFound`]; at 12 difficulty bits the expected
/// search is ~4096 hashes, nowhere near the ceiling.
pub fn run(block: &Block) -> Result<(u64, Hash256), PyriteError> {
    let merkle_root = block.hash_transactions()?;

    for nonce in 0..=MAX_NONCE {
        let hash = sha256(&preimage(block, &merkle_root, nonce));
        if meets_difficulty(&hash, DIFFICULTY_BITS) {
            debug!(height = block.height, nonce, %hash, "proof of work found");
            return Ok((nonce, hash));
        }
    }

    Err(PowError::NoSolutionFound.into())
}

/// Recompute the hash with the block's stored nonce and check it.
///
/// A block validates when the recomputed hash matches the stored one and
/// meets the difficulty target.
pub fn validate(block: &Block) -> Result<bool, PyriteError> {
    let merkle_root = block.hash_transactions()?;
    let hash = sha256(&preimage(block, &merkle_root, block.nonce));
    Ok(hash == block.hash && meets_difficulty(&hash, DIFFICULTY_BITS))
}
