use std::sync::Arc;

use shroud_privacy::{MerkleAccumulator, PersistedTree};
use tracing::debug;

use crate::error::Result;
use crate::storage::{KvExt, KvStore};

const TREE_KEY: &str = "merkle/tree";

/// Persists the accumulator under a single key
pub struct TreeStore<S> {
    store: Arc<S>,
}

impl<S> Clone for TreeStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KvStore> TreeStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Prune, then write the whole tree in one put
    pub fn persist(&self, tree: &mut MerkleAccumulator) -> Result<()> {
        tree.prune();
        let persisted = tree.to_persisted();
        self.store.put_json(TREE_KEY, &persisted)?;
        debug!(
            count = persisted.count,
            retained = persisted.leaves.len(),
            staged = persisted.uncommitted_leaves.len(),
            "Persisted accumulator"
        );
        Ok(())
    }

    /// Load the persisted tree, if any
    pub fn load(&self) -> Result<Option<MerkleAccumulator>> {
        match self.store.get_json::<PersistedTree>(TREE_KEY)? {
            Some(persisted) => Ok(Some(MerkleAccumulator::from_persisted(persisted)?)),
            None => Ok(None),
        }
    }

    /// Load the persisted tree or start from an empty one
    pub fn load_or_default(&self) -> Result<MerkleAccumulator> {
        Ok(self.load()?.unwrap_or_default())
    }
}
