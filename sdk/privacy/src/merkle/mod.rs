//! Merkle Accumulator for Note Commitments
//!
//! A fixed-depth quaternary Poseidon tree over every commitment ever inserted
//! into the pool. The client only keeps the nodes it needs to prove the
//! leaves it cares about, plus the right-hand frontier needed to keep
//! extending the tree.
//!
//! ```text
//!                          Root
//!            ┌──────────┬────┴─────┬──────────┐
//!           N0         N1         N2         N3 ◀── hash-only stub after pruning
//!      ┌───┬┴──┬───┐
//!     C0  C1  C2  C3    (Note Commitments, retained group)
//! ```
//!
//! Absent children are never materialized: a `None` slot stands for the
//! empty subtree of that height, whose hash comes from a precomputed table.

mod accumulator;
mod hasher;
mod proof;

use thiserror::Error;

pub use accumulator::{MerkleAccumulator, PersistedTree, StagedLeaf, TreeNode};
pub use hasher::{Hash, MerkleHasher};
pub use proof::MerkleProof;

/// Tree depth (number of levels between root and leaves)
pub const DEPTH: usize = 16;

/// Children per internal node
pub const ARITY: usize = 4;

/// Capacity of the tree, `ARITY^DEPTH`
pub const MAX_LEAVES: u64 = (ARITY as u64).pow(DEPTH as u32);

/// Accumulator errors. All of them are caller bugs: nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: u64, capacity: u64 },

    #[error("non-monotonic insert: index {index} is below next free index {next}")]
    NonMonotonicIndex { index: u64, next: u64 },

    #[error("batch length mismatch: {leaves} leaves, {includes} include flags")]
    LengthMismatch { leaves: usize, includes: usize },

    #[error("leaf {0} is not retained for proving")]
    LeafNotRetained(u64),

    #[error("staged leaves are not contiguous: expected index {expected}, found {found}")]
    NonContiguousCommit { expected: u64, found: u64 },

    #[error("malformed proof: {0}")]
    MalformedProof(String),
}

/// Slot of the child containing `index` inside the node at `height`.
///
/// Root-to-leaf walks read the base-ARITY digits of the index from the most
/// significant end; proofs store them least significant first.
pub(crate) fn digit(index: u64, height: usize) -> usize {
    let span = subtree_span(height - 1);
    ((index / span) % ARITY as u64) as usize
}

/// Number of leaf positions covered by a node at `height`
pub(crate) fn subtree_span(height: usize) -> u64 {
    (ARITY as u64).pow(height as u32)
}
