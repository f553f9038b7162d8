use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;

/// Merkle tree over the serialized transactions of a block
///
/// Leaves are the SHA-256 of each serialization, parents are the SHA-256 of
/// `left ‖ right`. A level with an odd number of nodes (the leaf level
/// included, even when it holds a single leaf) is padded by repeating its
/// last node. Every level is kept so inclusion proofs can be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    // levels[0] holds the leaf hashes, the last level holds only the root
    levels: Vec<Vec<Vec<u8>>>,
    leaf_count: usize,
}

/// Merkle proof for transaction inclusion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Leaf hash being proven (SHA-256 of the serialized transaction)
    pub leaf_hash: Vec<u8>,
    /// Index of the transaction in the block
    pub leaf_index: usize,
    /// Sibling hashes from the leaf level upwards
    pub path: Vec<ProofElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofElement {
    /// Sibling hash
    pub hash: Vec<u8>,
    /// Direction: true if sibling is on the right, false if on the left
    pub is_right: bool,
}

impl MerkleTree {
    /// Build a tree from the serialized transactions, in block order
    pub fn new(serialized_transactions: &[Vec<u8>]) -> Result<Self> {
        if serialized_transactions.is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "Cannot build a Merkle tree from an empty transaction list".to_string(),
            ));
        }

        let leaves: Vec<Vec<u8>> = serialized_transactions
            .iter()
            .map(|data| sha256_digest(data))
            .collect();
        let leaf_count = leaves.len();

        let mut levels = Vec::new();
        let mut current = leaves;
        loop {
            if current.len() % 2 == 1 {
                let last = current[current.len() - 1].clone();
                current.push(last);
            }
            let next: Vec<Vec<u8>> = current
                .chunks(2)
                .map(|pair| Self::hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(current);
            if next.len() == 1 {
                levels.push(next);
                break;
            }
            current = next;
        }

        Ok(MerkleTree { levels, leaf_count })
    }

    /// Convenience for callers that only need the commitment
    pub fn root_of(serialized_transactions: &[Vec<u8>]) -> Result<Vec<u8>> {
        Ok(Self::new(serialized_transactions)?.root().to_vec())
    }

    pub fn root(&self) -> &[u8] {
        // the constructor guarantees a final level of exactly one node
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Generate an inclusion proof for the transaction at `leaf_index`
    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        if leaf_index >= self.leaf_count {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction index {leaf_index} out of bounds (leaves: {})",
                self.leaf_count
            )));
        }

        let mut path = Vec::with_capacity(self.levels.len() - 1);
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = index % 2 == 0;
            let sibling = if is_right { index + 1 } else { index - 1 };
            path.push(ProofElement {
                hash: level[sibling].clone(),
                is_right,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.levels[0][leaf_index].clone(),
            leaf_index,
            path,
        })
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}

impl MerkleProof {
    /// Recompute the root from the leaf and its path and compare
    pub fn verify(&self, expected_root: &[u8]) -> bool {
        let mut current = self.leaf_hash.clone();
        for element in &self.path {
            current = if element.is_right {
                MerkleTree::hash_pair(&current, &element.hash)
            } else {
                MerkleTree::hash_pair(&element.hash, &current)
            };
        }
        current == expected_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_single_transaction_root_duplicates_leaf() {
        let root = MerkleTree::root_of(&data(&["coinbase"])).unwrap();
        let leaf = sha256_digest(b"coinbase");
        assert_eq!(root, MerkleTree::hash_pair(&leaf, &leaf));
        assert_eq!(root.len(), 32);
    }

    #[test]
    fn test_odd_level_duplicates_last_node() {
        let items = data(&["a", "b", "c"]);
        let root = MerkleTree::root_of(&items).unwrap();

        let (a, b, c) = (
            sha256_digest(b"a"),
            sha256_digest(b"b"),
            sha256_digest(b"c"),
        );
        let left = MerkleTree::hash_pair(&a, &b);
        let right = MerkleTree::hash_pair(&c, &c);
        assert_eq!(root, MerkleTree::hash_pair(&left, &right));
    }

    #[test]
    fn test_root_is_order_sensitive() {
        let forward = MerkleTree::root_of(&data(&["a", "b"])).unwrap();
        let reversed = MerkleTree::root_of(&data(&["b", "a"])).unwrap();
        assert_ne!(forward, reversed);
    }

    #[test]
    fn test_empty_transaction_list() {
        assert!(MerkleTree::new(&[]).is_err());
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        let items = data(&["a", "b", "c", "d", "e"]);
        let tree = MerkleTree::new(&items).unwrap();
        assert_eq!(tree.leaf_count(), 5);

        for index in 0..items.len() {
            let proof = tree.proof(index).unwrap();
            assert!(proof.verify(tree.root()), "proof for leaf {index} failed");
        }
        assert!(tree.proof(5).is_err());
    }

    #[test]
    fn test_proof_fails_against_other_root() {
        let tree = MerkleTree::new(&data(&["a", "b", "c"])).unwrap();
        let other = MerkleTree::new(&data(&["a", "b", "x"])).unwrap();
        let proof = tree.proof(1).unwrap();
        assert!(!proof.verify(other.root()));
    }
}
