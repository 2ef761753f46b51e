use serde::{Deserialize, Serialize};

use super::{ARITY, DEPTH, Hash, MerkleHasher, TreeError};

/// A membership proof for one leaf
///
/// `siblings` and `path_indices` run leaf to root: entry `i` holds the
/// `ARITY - 1` other children at height `i` and the slot the path takes there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub root: Hash,
    pub leaf: Hash,
    pub siblings: Vec<Vec<Hash>>,
    pub path_indices: Vec<usize>,
}

impl MerkleProof {
    /// Reject proofs that could not have come from a tree of this shape
    pub fn check_shape(&self) -> Result<(), TreeError> {
        if self.siblings.len() != DEPTH || self.path_indices.len() != DEPTH {
            return Err(TreeError::MalformedProof(format!(
                "expected {} levels, got {} siblings and {} path indices",
                DEPTH,
                self.siblings.len(),
                self.path_indices.len()
            )));
        }
        if let Some(level) = self.siblings.iter().position(|s| s.len() != ARITY - 1) {
            return Err(TreeError::MalformedProof(format!(
                "level {level} has {} siblings",
                self.siblings[level].len()
            )));
        }
        if let Some(level) = self.path_indices.iter().position(|d| *d >= ARITY) {
            return Err(TreeError::MalformedProof(format!(
                "level {level} path index {} out of range",
                self.path_indices[level]
            )));
        }
        Ok(())
    }

    /// Recompute the root from the leaf and path and compare. Linear in
    /// depth; never touches a tree.
    pub fn verify(&self) -> bool {
        if self.check_shape().is_err() {
            return false;
        }

        let hasher = MerkleHasher::global();
        let mut current = self.leaf;

        for (siblings, &slot) in self.siblings.iter().zip(&self.path_indices) {
            let mut rest = siblings.iter().copied();
            let mut children = [[0u8; 32]; ARITY];
            for (i, child) in children.iter_mut().enumerate() {
                *child = if i == slot {
                    current
                } else {
                    match rest.next() {
                        Some(h) => h,
                        None => return false,
                    }
                };
            }
            current = hasher.hash_children(&children);
        }

        current == self.root
    }

    /// Leaf position encoded by the path
    pub fn index(&self) -> u64 {
        self.path_indices
            .iter()
            .rev()
            .fold(0u64, |acc, d| acc * ARITY as u64 + *d as u64)
    }
}
