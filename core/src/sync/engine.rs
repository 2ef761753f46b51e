//! Sync Engine
//!
//! Folds the chain's state diffs into the ledger and the accumulator.
//!
//! ```text
//! ┌──────┐   ┌───────┐   ┌─────────┐   ┌──────────────┐   ┌─────────────┐
//! │ IDLE │──▶│ FETCH │──▶│ DECRYPT │──▶│ APPLY LEDGER │──▶│ REPLAY TREE │──┐
//! └──────┘   └───────┘   └─────────┘   └──────────────┘   └─────────────┘  │
//!    ▲           ▲                                                         │
//!    └───────────┴──────────────── next diff / done ───────────────────────┘
//! ```
//!
//! FETCH is the only suspension point. A diff is applied to the ledger and
//! replayed into the tree under both locks before the next one is pulled,
//! so stopping between diffs always leaves a resumable state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use shroud_config::SyncConfig;
use shroud_privacy::{Hash, MerkleAccumulator, TreeError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::ledger::NoteLedger;
use crate::snapshot::SnapshotStore;
use crate::storage::{KvStore, TreeStore};
use crate::sync::decrypt::decrypt_state_diff;
use crate::sync::source::{DeltaSource, IterStateDiffsOpts};
use crate::types::{StateDiff, TotalEntityIndex};
use crate::viewer::Viewer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOpts {
    /// Sync up to this block instead of the source's indexed head
    pub to_block: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub diffs_applied: usize,
    /// TEI of the last diff applied by this run
    pub latest_tei: Option<TotalEntityIndex>,
    pub cancelled: bool,
}

pub struct SyncEngine<S, D, V> {
    ledger: Arc<Mutex<NoteLedger<S>>>,
    tree: Arc<Mutex<MerkleAccumulator>>,
    tree_store: TreeStore<S>,
    snapshots: Option<SnapshotStore<S>>,
    source: D,
    viewer: V,
    config: SyncConfig,
    cancel: CancellationToken,
    applied: AtomicU64,
}

impl<S, D, V> SyncEngine<S, D, V>
where
    S: KvStore + 'static,
    D: DeltaSource,
    V: Viewer,
{
    pub fn new(
        ledger: Arc<Mutex<NoteLedger<S>>>,
        tree: Arc<Mutex<MerkleAccumulator>>,
        tree_store: TreeStore<S>,
        source: D,
        viewer: V,
        config: SyncConfig,
    ) -> Self {
        Self {
            ledger,
            tree,
            tree_store,
            snapshots: None,
            source,
            viewer,
            config,
            cancel: CancellationToken::new(),
            applied: AtomicU64::new(0),
        }
    }

    /// Ledger and tree over one store, loading the persisted tree if any
    pub fn open(store: Arc<S>, source: D, viewer: V, config: SyncConfig) -> Result<Self> {
        let tree_store = TreeStore::new(Arc::clone(&store));
        let tree = tree_store.load_or_default()?;
        info!(
            committed = tree.count(),
            staged = tree.uncommitted_len(),
            "Opened accumulator"
        );

        Ok(Self::new(
            Arc::new(Mutex::new(NoteLedger::new(store))),
            Arc::new(Mutex::new(tree)),
            tree_store,
            source,
            viewer,
            config,
        ))
    }

    /// Snapshot every `config.snapshot_interval` applied diffs into `snapshots`
    pub fn with_snapshots(mut self, snapshots: SnapshotStore<S>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn ledger(&self) -> Arc<Mutex<NoteLedger<S>>> {
        Arc::clone(&self.ledger)
    }

    pub fn tree(&self) -> Arc<Mutex<MerkleAccumulator>> {
        Arc::clone(&self.tree)
    }

    /// Cancelling stops the current and every later `sync` between diffs
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn root(&self) -> Hash {
        self.tree.lock().await.root()
    }

    /// Pull and apply diffs until the source has nothing more up to the
    /// target block
    pub async fn sync(&self, opts: SyncOpts) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let head = match opts.to_block {
            Some(block) => block,
            None => self
                .source
                .latest_indexed_block()
                .await
                .map_err(CoreError::Source)?,
        };
        let Some(target_block) = head.checked_sub(self.config.finality_blocks) else {
            debug!(head, finality = self.config.finality_blocks, "Nothing final yet");
            return Ok(report);
        };
        let to_tei = TotalEntityIndex::last_of_block(target_block);

        let from = self
            .ledger
            .lock()
            .await
            .current_tei()?
            .map_or(TotalEntityIndex::ZERO, |tei| tei.next());
        if from > to_tei {
            return Ok(report);
        }

        info!(from = %from, to = %to_tei, "Starting sync");
        let mut stream = self.source.iter_state_diffs(
            from,
            IterStateDiffsOpts {
                to_tei: Some(to_tei),
                finality_blocks: self.config.finality_blocks,
            },
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stream.close();
                    report.cancelled = true;
                    break;
                }
                item = stream.next() => item,
            };
            let Some(item) = next else {
                break;
            };

            let raw = item.map_err(CoreError::Source)?;
            let diff = decrypt_state_diff(raw, &self.viewer);
            self.apply_diff(&diff).await?;

            report.diffs_applied += 1;
            report.latest_tei = Some(diff.total_entity_index);
        }

        info!(
            applied = report.diffs_applied,
            cancelled = report.cancelled,
            "Sync finished"
        );
        Ok(report)
    }

    /// Apply one decrypted diff to the ledger and replay it into the tree.
    ///
    /// The tree is staged and persisted before the ledger cursor moves, so a
    /// crash anywhere in here makes the next sync deliver this diff again.
    /// Returns the merkle indices the diff nullified.
    pub async fn apply_diff(&self, diff: &StateDiff) -> Result<Vec<u64>> {
        let ledger = self.ledger.lock().await;
        let mut tree = self.tree.lock().await;

        ledger.ensure_tei_not_behind(diff.total_entity_index)?;
        stage_and_commit(&mut tree, diff)?;
        self.tree_store.persist(&mut tree)?;

        let nullified = ledger.apply_state_diff(diff)?;
        if !nullified.is_empty() {
            release_nullified(&mut tree, &nullified)?;
            self.tree_store.persist(&mut tree)?;
        }

        let applied = self.applied.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(snapshots) = &self.snapshots {
            let interval = self.config.snapshot_interval;
            if interval > 0 && applied % interval == 0 {
                snapshots.take_snapshot(&*ledger, &*tree)?;
            }
        }

        debug!(
            tei = %diff.total_entity_index,
            committed = tree.count(),
            staged = tree.uncommitted_len(),
            nullified = nullified.len(),
            "Replayed diff"
        );
        Ok(nullified)
    }

    /// Write the tree to the store now
    pub async fn persist_tree(&self) -> Result<()> {
        let mut tree = self.tree.lock().await;
        self.tree_store.persist(&mut tree)
    }

    /// Roll ledger and tree back to the newest snapshot at or before `tei`.
    /// Returns the TEI restored, or `None` if there is no such snapshot.
    pub async fn restore_latest_snapshot(
        &self,
        tei: TotalEntityIndex,
    ) -> Result<Option<TotalEntityIndex>> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(None);
        };
        let Some(found) = snapshots.latest_snapshot_at_or_before(tei)? else {
            return Ok(None);
        };

        let ledger = self.ledger.lock().await;
        let mut tree = self.tree.lock().await;
        snapshots.restore_snapshot(found, &*ledger, &mut *tree)?;
        self.tree_store.persist(&mut tree)?;
        Ok(Some(found))
    }
}

/// Stage the diff's new leaves and move the commit boundary.
///
/// Entries below the tree's next free index were staged by an earlier
/// application of the same diff and are skipped.
fn stage_and_commit(tree: &mut MerkleAccumulator, diff: &StateDiff) -> Result<()> {
    let mut next = tree.total_count();
    let mut run_start = next;
    let mut leaves: Vec<Hash> = Vec::new();
    let mut includes: Vec<bool> = Vec::new();

    for entry in &diff.notes_and_commitments {
        let index = entry.merkle_index();
        if index < next {
            continue;
        }
        if index != next && !leaves.is_empty() {
            tree.insert_batch_uncommitted(run_start, &leaves, &includes)?;
            leaves.clear();
            includes.clear();
        }
        if leaves.is_empty() {
            run_start = index;
        }
        leaves.push(entry.commitment().0);
        includes.push(entry.as_note().is_some());
        next = index + 1;
    }
    if !leaves.is_empty() {
        tree.insert_batch_uncommitted(run_start, &leaves, &includes)?;
    }

    if let Some(commit_index) = diff.latest_committed_merkle_index {
        if commit_index >= tree.count() {
            let committed = tree.commit_up_to_index(commit_index)?;
            if tree.count() <= commit_index {
                warn!(
                    commit_index,
                    committed,
                    count = tree.count(),
                    "Commit boundary is ahead of the staged leaves"
                );
            }
        }
    }
    Ok(())
}

/// Stop retaining leaves of notes that were just spent
fn release_nullified(tree: &mut MerkleAccumulator, nullified: &[u64]) -> Result<()> {
    for &index in nullified {
        match tree.mark_for_pruning(index) {
            Ok(()) => {}
            Err(TreeError::LeafNotRetained(_)) => {
                debug!(merkle_index = index, "Nullified note was not retained");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
