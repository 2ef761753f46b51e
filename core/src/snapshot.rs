//! Ledger + accumulator snapshots keyed by TEI.
//!
//! A snapshot is taken at the last point where every synced leaf was
//! committed, so restoring it and resyncing from its TEI re-delivers
//! everything that was staged afterwards.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shroud_privacy::{MerkleAccumulator, PersistedTree};
use tracing::info;

use crate::error::{CoreError, Result};
use crate::ledger::{LedgerDump, NoteLedger};
use crate::storage::{KvExt, KvStore, MemoryKvStore};
use crate::types::TotalEntityIndex;

const SNAPSHOT_PREFIX: &str = "snapshot-";

/// Snapshot key; fixed-width hex keeps key order equal to TEI order
pub fn snapshot_key(tei: TotalEntityIndex) -> String {
    format!("{SNAPSHOT_PREFIX}{:032x}", tei.0)
}

fn tei_from_key(key: &str) -> Result<TotalEntityIndex> {
    key.strip_prefix(SNAPSHOT_PREFIX)
        .and_then(TotalEntityIndex::from_hex)
        .ok_or_else(|| CoreError::MissingRecord(format!("malformed snapshot key {key}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tei: TotalEntityIndex,
    pub ledger: LedgerDump,
    pub tree: PersistedTree,
}

pub struct SnapshotStore<S> {
    store: Arc<S>,
}

impl<S> Clone for SnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KvStore> SnapshotStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Snapshot the committed state of `ledger` and `tree`.
    ///
    /// Works on copies: the live ledger and tree are left untouched. Returns
    /// the TEI the snapshot is stored under (zero if nothing was ever
    /// committed).
    pub fn take_snapshot<L: KvStore>(
        &self,
        ledger: &NoteLedger<L>,
        tree: &MerkleAccumulator,
    ) -> Result<TotalEntityIndex> {
        let scratch = NoteLedger::new(Arc::new(MemoryKvStore::new()));
        scratch.import_dump(&ledger.export_dump()?)?;
        scratch.rewind_to_last_commit()?;
        let tei = scratch.current_tei()?.unwrap_or(TotalEntityIndex::ZERO);

        let mut tree = tree.clone();
        tree.drop_uncommitted();
        tree.prune();

        let snapshot = Snapshot {
            tei,
            ledger: scratch.export_dump()?,
            tree: tree.to_persisted(),
        };
        self.store.put_json(&snapshot_key(tei), &snapshot)?;

        info!(tei = %tei, leaves = tree.count(), "Took snapshot");
        Ok(tei)
    }

    pub fn load_snapshot(&self, tei: TotalEntityIndex) -> Result<Snapshot> {
        let key = snapshot_key(tei);
        self.store
            .get_json(&key)?
            .ok_or(CoreError::MissingRecord(key))
    }

    /// Newest snapshot with TEI `<= tei`
    pub fn latest_snapshot_at_or_before(
        &self,
        tei: TotalEntityIndex,
    ) -> Result<Option<TotalEntityIndex>> {
        // Smallest key after `snapshot_key(tei)`
        let end = format!("{}\0", snapshot_key(tei));
        match self.store.iter_range(SNAPSHOT_PREFIX, &end)?.last() {
            Some((key, _)) => Ok(Some(tei_from_key(key)?)),
            None => Ok(None),
        }
    }

    /// Replace the ledger content and the tree with the snapshot at `tei`
    pub fn restore_snapshot<L: KvStore>(
        &self,
        tei: TotalEntityIndex,
        ledger: &NoteLedger<L>,
        tree: &mut MerkleAccumulator,
    ) -> Result<()> {
        let snapshot = self.load_snapshot(tei)?;
        let restored = MerkleAccumulator::from_persisted(snapshot.tree)?;
        ledger.import_dump(&snapshot.ledger)?;
        *tree = restored;

        info!(tei = %tei, leaves = tree.count(), "Restored snapshot");
        Ok(())
    }

    pub fn list_snapshots(&self) -> Result<Vec<TotalEntityIndex>> {
        self.store
            .iter_prefix(SNAPSHOT_PREFIX)?
            .iter()
            .map(|(key, _)| tei_from_key(key))
            .collect()
    }

    /// Delete every snapshot older than `tei`. Returns how many went.
    pub fn remove_snapshots_before(&self, tei: TotalEntityIndex) -> Result<usize> {
        let stale: Vec<String> = self
            .store
            .iter_range(SNAPSHOT_PREFIX, &snapshot_key(tei))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        let removed = stale.len();
        if removed > 0 {
            self.store.remove_many(stale)?;
        }
        Ok(removed)
    }
}
