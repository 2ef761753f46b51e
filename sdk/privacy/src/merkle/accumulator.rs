//! Pruned, incrementally updatable sparse accumulator.
//!
//! Leaves are either committed (part of the root) or staged in a FIFO until
//! the chain finalizes them. `prune` drops every node that is neither on the
//! proof path of a retained leaf nor needed to extend the tree; dropped
//! subtrees keep their parent's hash, so the root never changes.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::{
    ARITY, DEPTH, Hash, MAX_LEAVES, MerkleHasher, MerkleProof, TreeError, digit, subtree_span,
};

type Children = [Option<TreeNode>; ARITY];

/// Accumulator node.
///
/// A node without children is a leaf at height 0 and a hash-only stub
/// (pruned subtree) anywhere above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub hash: Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Box<Children>>,
}

impl TreeNode {
    fn empty(height: usize) -> Self {
        Self {
            hash: *MerkleHasher::global().empty_root(height),
            children: None,
        }
    }

    fn rehash(&mut self, height: usize) {
        let hasher = MerkleHasher::global();
        if let Some(children) = &self.children {
            let mut hashes = [[0u8; 32]; ARITY];
            for (hash, child) in hashes.iter_mut().zip(children.iter()) {
                *hash = child
                    .as_ref()
                    .map_or(*hasher.empty_root(height - 1), |c| c.hash);
            }
            self.hash = hasher.hash_children(&hashes);
        }
    }
}

/// A leaf observed on chain but not yet part of the committed tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedLeaf {
    pub index: u64,
    pub leaf: Hash,
    pub include: bool,
}

/// Serialized form of an accumulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTree {
    pub root: TreeNode,
    pub leaves: BTreeMap<u64, Hash>,
    pub uncommitted_leaves: Vec<StagedLeaf>,
    pub count: u64,
}

/// Quaternary Poseidon accumulator that only keeps what it must
#[derive(Debug, Clone)]
pub struct MerkleAccumulator {
    root: TreeNode,
    /// Committed leaves, including zero-filled gaps
    count: u64,
    /// Leaves kept for proof generation
    leaves: BTreeMap<u64, Hash>,
    uncommitted: VecDeque<StagedLeaf>,
}

impl MerkleAccumulator {
    /// Create a new empty tree
    pub fn new() -> Self {
        Self {
            root: TreeNode::empty(DEPTH),
            count: 0,
            leaves: BTreeMap::new(),
            uncommitted: VecDeque::new(),
        }
    }

    /// Get current root
    pub fn root(&self) -> Hash {
        self.root.hash
    }

    /// Number of committed leaf positions
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Committed plus staged leaf positions; the next free index
    pub fn total_count(&self) -> u64 {
        self.uncommitted.back().map_or(self.count, |l| l.index + 1)
    }

    pub fn uncommitted_len(&self) -> usize {
        self.uncommitted.len()
    }

    pub fn is_retained(&self, index: u64) -> bool {
        self.leaves.contains_key(&index)
    }

    pub fn retained_indices(&self) -> Vec<u64> {
        self.leaves.keys().copied().collect()
    }

    /// Leaf nodes physically present in the tree
    pub fn leaf_node_count(&self) -> usize {
        count_leaf_nodes(&self.root, DEPTH)
    }

    pub fn insert(&mut self, index: u64, leaf: Hash, include: bool) -> Result<(), TreeError> {
        self.insert_batch(index, &[leaf], &[include])
    }

    /// Insert `leaves` at `start..start + len`. Positions between the current
    /// count and `start` stay empty.
    pub fn insert_batch(
        &mut self,
        start: u64,
        leaves: &[Hash],
        includes: &[bool],
    ) -> Result<(), TreeError> {
        let end = self.check_batch(start, self.count, leaves, includes)?;
        if leaves.is_empty() {
            return Ok(());
        }

        insert_range(&mut self.root, DEPTH, 0, start, leaves);

        for (offset, (leaf, include)) in leaves.iter().zip(includes).enumerate() {
            if *include {
                self.leaves.insert(start + offset as u64, *leaf);
            }
        }
        self.count = end;
        Ok(())
    }

    pub fn insert_uncommitted(
        &mut self,
        index: u64,
        leaf: Hash,
        include: bool,
    ) -> Result<(), TreeError> {
        self.insert_batch_uncommitted(index, &[leaf], &[include])
    }

    /// Stage leaves without touching the root or the count
    pub fn insert_batch_uncommitted(
        &mut self,
        start: u64,
        leaves: &[Hash],
        includes: &[bool],
    ) -> Result<(), TreeError> {
        self.check_batch(start, self.total_count(), leaves, includes)?;

        for (offset, (leaf, include)) in leaves.iter().zip(includes).enumerate() {
            self.uncommitted.push_back(StagedLeaf {
                index: start + offset as u64,
                leaf: *leaf,
                include: *include,
            });
        }
        Ok(())
    }

    /// Move every staged leaf with index `<= commit_index` into the tree.
    ///
    /// The staged run has to start at the current count and be contiguous.
    /// Returns how many leaves were committed; leaves past `commit_index`
    /// stay staged.
    pub fn commit_up_to_index(&mut self, commit_index: u64) -> Result<usize, TreeError> {
        let mut expected = self.count;
        let mut run = 0;
        for staged in &self.uncommitted {
            if staged.index > commit_index {
                break;
            }
            if staged.index != expected {
                return Err(TreeError::NonContiguousCommit {
                    expected,
                    found: staged.index,
                });
            }
            expected += 1;
            run += 1;
        }
        if run == 0 {
            return Ok(0);
        }

        let batch: Vec<StagedLeaf> = self.uncommitted.drain(..run).collect();
        let leaves: Vec<Hash> = batch.iter().map(|l| l.leaf).collect();
        let includes: Vec<bool> = batch.iter().map(|l| l.include).collect();
        self.insert_batch(self.count, &leaves, &includes)?;
        Ok(run)
    }

    /// Forget every staged leaf. Returns how many were dropped.
    pub fn drop_uncommitted(&mut self) -> usize {
        let dropped = self.uncommitted.len();
        self.uncommitted.clear();
        dropped
    }

    /// Stop retaining `index` for proofs. A staged leaf loses its include
    /// flag so it is never retained once committed.
    pub fn mark_for_pruning(&mut self, index: u64) -> Result<(), TreeError> {
        if self.leaves.remove(&index).is_some() {
            return Ok(());
        }
        if let Some(staged) = self
            .uncommitted
            .iter_mut()
            .find(|l| l.index == index && l.include)
        {
            staged.include = false;
            return Ok(());
        }
        Err(TreeError::LeafNotRetained(index))
    }

    /// Membership proof for a retained leaf
    pub fn get_proof(&self, index: u64) -> Result<MerkleProof, TreeError> {
        let leaf = *self
            .leaves
            .get(&index)
            .ok_or(TreeError::LeafNotRetained(index))?;

        let hasher = MerkleHasher::global();
        let mut siblings = Vec::with_capacity(DEPTH);
        let mut path_indices = Vec::with_capacity(DEPTH);
        let mut node = &self.root;

        for height in (1..=DEPTH).rev() {
            let children = node
                .children
                .as_ref()
                .ok_or(TreeError::LeafNotRetained(index))?;
            let slot = digit(index, height);

            siblings.push(
                children
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != slot)
                    .map(|(_, c)| c.as_ref().map_or(*hasher.empty_root(height - 1), |c| c.hash))
                    .collect(),
            );
            path_indices.push(slot);

            node = children[slot]
                .as_ref()
                .ok_or(TreeError::LeafNotRetained(index))?;
        }

        // Collected root to leaf
        siblings.reverse();
        path_indices.reverse();

        Ok(MerkleProof {
            root: self.root.hash,
            leaf,
            siblings,
            path_indices,
        })
    }

    /// Drop every node not needed for a retained leaf's proof or for the
    /// next insertion
    pub fn prune(&mut self) {
        if self.count == 0 {
            return;
        }
        let rightmost_group = (self.count - 1) / ARITY as u64;
        prune_node(&mut self.root, DEPTH, 0, &self.leaves, rightmost_group);
    }

    pub fn to_persisted(&self) -> PersistedTree {
        PersistedTree {
            root: self.root.clone(),
            leaves: self.leaves.clone(),
            uncommitted_leaves: self.uncommitted.iter().copied().collect(),
            count: self.count,
        }
    }

    pub fn from_persisted(persisted: PersistedTree) -> Result<Self, TreeError> {
        if persisted.count > MAX_LEAVES {
            return Err(TreeError::IndexOutOfRange {
                index: persisted.count,
                capacity: MAX_LEAVES,
            });
        }
        if let Some((&index, _)) = persisted.leaves.range(persisted.count..).next() {
            return Err(TreeError::IndexOutOfRange {
                index,
                capacity: persisted.count,
            });
        }
        let mut next = persisted.count;
        for staged in &persisted.uncommitted_leaves {
            if staged.index < next {
                return Err(TreeError::NonMonotonicIndex {
                    index: staged.index,
                    next,
                });
            }
            next = staged.index + 1;
        }

        Ok(Self {
            root: persisted.root,
            count: persisted.count,
            leaves: persisted.leaves,
            uncommitted: persisted.uncommitted_leaves.into(),
        })
    }

    fn check_batch(
        &self,
        start: u64,
        next: u64,
        leaves: &[Hash],
        includes: &[bool],
    ) -> Result<u64, TreeError> {
        if leaves.len() != includes.len() {
            return Err(TreeError::LengthMismatch {
                leaves: leaves.len(),
                includes: includes.len(),
            });
        }
        if start < next {
            return Err(TreeError::NonMonotonicIndex { index: start, next });
        }
        let end = start.saturating_add(leaves.len() as u64);
        if end > MAX_LEAVES || start >= MAX_LEAVES {
            return Err(TreeError::IndexOutOfRange {
                index: end.saturating_sub(1).max(start),
                capacity: MAX_LEAVES,
            });
        }
        Ok(end)
    }
}

impl Default for MerkleAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `leaves` (starting at `batch_start`) below `node`, rehashing every
/// touched node exactly once on the way back up
fn insert_range(
    node: &mut TreeNode,
    height: usize,
    node_start: u64,
    batch_start: u64,
    leaves: &[Hash],
) {
    if height == 0 {
        node.hash = leaves[(node_start - batch_start) as usize];
        return;
    }
    debug_assert!(
        node.children.is_some() || node.hash == *MerkleHasher::global().empty_root(height),
        "insertion reached a pruned subtree"
    );

    let span = subtree_span(height - 1);
    let batch_end = batch_start + leaves.len() as u64;
    let children = node.children.get_or_insert_with(Box::default);

    for (slot, child) in children.iter_mut().enumerate() {
        let child_start = node_start + slot as u64 * span;
        let child_end = child_start + span;
        if child_end <= batch_start || child_start >= batch_end {
            continue;
        }
        let child = child.get_or_insert_with(|| TreeNode::empty(height - 1));
        insert_range(child, height - 1, child_start, batch_start, leaves);
    }

    node.rehash(height);
}

/// Returns how many leaves below `node` must stay. A node whose whole
/// subtree may go is turned into a hash-only stub.
fn prune_node(
    node: &mut TreeNode,
    height: usize,
    node_start: u64,
    retained: &BTreeMap<u64, Hash>,
    rightmost_group: u64,
) -> usize {
    let Some(children) = node.children.as_mut() else {
        return 0;
    };

    if height == 1 {
        let group = node_start / ARITY as u64;
        let has_retained = retained
            .range(node_start..node_start + ARITY as u64)
            .next()
            .is_some();
        if group == rightmost_group || has_retained {
            return children.iter().filter(|c| c.is_some()).count();
        }
        node.children = None;
        return 0;
    }

    let span = subtree_span(height - 1);
    let mut unprunable = 0;
    for (slot, child) in children.iter_mut().enumerate() {
        if let Some(child) = child {
            unprunable += prune_node(
                child,
                height - 1,
                node_start + slot as u64 * span,
                retained,
                rightmost_group,
            );
        }
    }

    if unprunable == 0 {
        node.children = None;
    }
    unprunable
}

fn count_leaf_nodes(node: &TreeNode, height: usize) -> usize {
    if height == 0 {
        return 1;
    }
    node.children.as_ref().map_or(0, |children| {
        children
            .iter()
            .flatten()
            .map(|c| count_leaf_nodes(c, height - 1))
            .sum()
    })
}
