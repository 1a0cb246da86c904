//! Binary Merkle tree for claim epochs.
//!
//! Internal nodes: `SHA256(min(a, b) || max(a, b))` with byte-wise ordering,
//! so a proof is a plain list of siblings and needs no left/right bits.
//! If a level has an odd node count, the last node is paired with itself.

use claimcraft_core::Hash;
use sha2::{Digest, Sha256};

/// A Merkle proof consisting of sibling hashes along the path to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Sibling hashes from leaf level to just below the root.
    pub siblings: Vec<Hash>,
    /// Index of the leaf this proof was generated for.
    pub leaf_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree with no leaves")]
    NoLeaves,

    #[error("Leaf index {0} is out of range")]
    LeafOutOfRange(usize),
}

/// A binary Merkle tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All nodes stored level by level, bottom-up. `layers[0]` = leaves.
    layers: Vec<Vec<Hash>>,
}

/// Hash two child nodes to produce a parent, independent of their order.
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(lo);
    hasher.update(hi);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

impl MerkleTree {
    /// Build a Merkle tree from pre-hashed leaves, in the given order.
    pub fn from_leaves(leaves: Vec<Hash>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::NoLeaves);
        }

        let mut layers = vec![leaves];

        // Build tree bottom-up
        while let Some(prev) = layers.last().filter(|l| l.len() > 1) {
            let mut next_layer = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next_layer.push(hash_pair(&pair[0], right));
            }
            layers.push(next_layer);
        }

        Ok(Self { layers })
    }

    /// Get the Merkle root.
    pub fn root(&self) -> Hash {
        // from_leaves guarantees at least one non-empty layer
        self.layers[self.layers.len() - 1][0]
    }

    /// Generate a proof for the leaf at the given index.
    ///
    /// Returns `None` if the index is out of range.
    pub fn proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        if leaf_index >= self.layers[0].len() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.layers.len() - 1);
        let mut idx = leaf_index;

        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling_idx = idx ^ 1;
            // Odd tail: the node was paired with itself
            let sibling = layer.get(sibling_idx).unwrap_or(&layer[idx]);
            siblings.push(*sibling);
            idx /= 2;
        }

        Some(MerkleProof {
            siblings,
            leaf_index,
        })
    }

    /// Fold a leaf hash through a proof and compare with the root.
    pub fn verify(root: &Hash, leaf: &Hash, siblings: &[Hash]) -> bool {
        let computed = siblings
            .iter()
            .fold(*leaf, |node, sibling| hash_pair(&node, sibling));
        computed == *root
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    /// Number of levels including the leaf level and the root.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Nodes at a given level (0 = leaves).
    pub fn layer(&self, level: usize) -> Option<&[Hash]> {
        self.layers.get(level).map(Vec::as_slice)
    }
}
