//! SHA-256 Merkle tree over transaction byte images.
//!
//! Leaves are the canonical encodings of each transaction; a leaf node is
//! the SHA-256 of its bytes and an internal node is the SHA-256 of its two
//! children concatenated. A layer with an odd count duplicates its last
//! node before pairing. This layout is protocol-fixed: the root is
//! committed into every block's proof-of-work pre-image.

use crate::crypto::sha256;
use crate::types::Hash256;

/// Compute the Merkle root of a list of serialized transactions.
///
/// Returns [`Hash256::ZERO`] for an empty list; blocks are never empty,
/// so that value can only appear in malformed data.
pub fn merkle_root(leaves: &[Vec<u8>]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }

    let mut layer: Vec<Hash256> = leaves.iter().map(|data| sha256(data)).collect();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

/// Pair adjacent nodes, duplicating the last when the layer is odd.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(left.as_bytes());
        data.extend_from_slice(right.as_bytes());
        next.push(sha256(&data));
        i += 2;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf(byte: u8) -> Vec<u8> {
        vec![byte; 16]
    }

    fn node(left: &Hash256, right: &Hash256) -> Hash256 {
        let mut data = Vec::new();
        data.extend_from_slice(left.as_bytes());
        data.extend_from_slice(right.as_bytes());
        sha256(&data)
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
    }

    #[test]
    fn single_leaf_is_its_hash() {
        assert_eq!(merkle_root(&[leaf(1)]), sha256(&leaf(1)));
    }

    #[test]
    fn two_leaves() {
        let expected = node(&sha256(&leaf(1)), &sha256(&leaf(2)));
        assert_eq!(merkle_root(&[leaf(1), leaf(2)]), expected);
    }

    #[test]
    fn odd_count_duplicates_last() {
        let la = sha256(&leaf(1));
        let lb = sha256(&leaf(2));
        let lc = sha256(&leaf(3));
        let expected = node(&node(&la, &lb), &node(&lc, &lc));
        assert_eq!(merkle_root(&[leaf(1), leaf(2), leaf(3)]), expected);
    }

    #[test]
    fn four_leaves_balanced() {
        let hashes: Vec<Hash256> = (1..=4).map(|i| sha256(&leaf(i))).collect();
        let expected = node(&node(&hashes[0], &hashes[1]), &node(&hashes[2], &hashes[3]));
        assert_eq!(
            merkle_root(&[leaf(1), leaf(2), leaf(3), leaf(4)]),
            expected
        );
    }

    #[test]
    fn deterministic() {
        let leaves: Vec<Vec<u8>> = (0..7).map(leaf).collect();
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
    }

    #[test]
    fn swapping_two_leaves_changes_the_root() {
        let a = vec![leaf(1), leaf(2), leaf(3)];
        let b = vec![leaf(2), leaf(1), leaf(3)];
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn changing_one_leaf_changes_the_root() {
        let a = vec![leaf(1), leaf(2), leaf(3), leaf(4), leaf(5)];
        let mut b = a.clone();
        b[4] = leaf(6);
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    proptest! {
        #[test]
        fn root_is_a_function_of_the_sequence(
            leaves in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 1..64),
                1..16,
            )
        ) {
            prop_assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
        }
    }
}
