//! Merkle root over an ordered list of transaction ids
//!
//! Leaf value = SHA256d(tx id); internal value = SHA256d(left ‖ right).
//! Whenever a level has an odd number of nodes, its last node is paired with
//! itself. A single leaf is the root.

use crate::crypto::double_sha256;
use crate::error::{LedgerError, Result};
use crate::types::Hash;

pub fn merkle_root(tx_ids: &[Hash]) -> Result<Hash> {
    if tx_ids.is_empty() {
        return Err(LedgerError::Validation(
            "Cannot calculate merkle root for empty transaction list".to_string(),
        ));
    }

    let mut level: Vec<Hash> = tx_ids.iter().map(|id| double_sha256(id)).collect();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(&pair[0]);
                combined[32..].copy_from_slice(&pair[1]);
                double_sha256(&combined)
            })
            .collect();
    }

    Ok(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(left: &Hash, right: &Hash) -> Hash {
        let mut combined = left.to_vec();
        combined.extend_from_slice(right);
        double_sha256(&combined)
    }

    #[test]
    fn test_single_leaf_is_root() {
        let id = [1u8; 32];
        assert_eq!(merkle_root(&[id]).unwrap(), double_sha256(&id));
    }

    #[test]
    fn test_empty_list_is_an_error() {
        assert!(merkle_root(&[]).is_err());
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        let ids = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let leaves: Vec<Hash> = ids.iter().map(|id| double_sha256(id)).collect();
        let expected = node(&node(&leaves[0], &leaves[1]), &node(&leaves[2], &leaves[2]));
        assert_eq!(merkle_root(&ids).unwrap(), expected);
    }

    #[test]
    fn test_odd_internal_level_duplicates_last() {
        // five leaves -> three nodes -> two -> one
        let ids: Vec<Hash> = (1..=5u8).map(|b| [b; 32]).collect();
        let l: Vec<Hash> = ids.iter().map(|id| double_sha256(id)).collect();
        let a = node(&l[0], &l[1]);
        let b = node(&l[2], &l[3]);
        let c = node(&l[4], &l[4]);
        let expected = node(&node(&a, &b), &node(&c, &c));
        assert_eq!(merkle_root(&ids).unwrap(), expected);
    }

    #[test]
    fn test_deterministic_and_order_sensitive() {
        let ids = [[1u8; 32], [2u8; 32]];
        let swapped = [[2u8; 32], [1u8; 32]];
        assert_eq!(merkle_root(&ids).unwrap(), merkle_root(&ids).unwrap());
        assert_ne!(merkle_root(&ids).unwrap(), merkle_root(&swapped).unwrap());
    }
}
