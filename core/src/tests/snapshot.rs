use std::sync::Arc;

use shroud_config::SyncConfig;
use shroud_privacy::MerkleAccumulator;

use super::{diff, owned_note, tei, token, viewer};
use crate::error::CoreError;
use crate::ledger::NoteLedger;
use crate::snapshot::SnapshotStore;
use crate::storage::MemoryKvStore;
use crate::sync::{InMemoryDeltaSource, SyncEngine, SyncOpts};
use crate::types::{GetNotesOpts, TotalEntityIndex};

use super::sync::chain;

fn engine_with_snapshots(
    interval: u64,
) -> (
    SyncEngine<MemoryKvStore, InMemoryDeltaSource, super::MockViewer>,
    SnapshotStore<MemoryKvStore>,
) {
    let store = Arc::new(MemoryKvStore::new());
    let snapshots = SnapshotStore::new(Arc::clone(&store));
    let config = SyncConfig {
        snapshot_interval: interval,
        ..Default::default()
    };
    let engine = SyncEngine::open(store, InMemoryDeltaSource::new(chain(), 3), viewer(), config)
        .unwrap()
        .with_snapshots(snapshots.clone());
    (engine, snapshots)
}

#[tokio::test]
async fn snapshot_is_taken_at_last_commit_without_touching_live_state() {
    let (engine, snapshots) = engine_with_snapshots(0);
    engine.sync(SyncOpts::default()).await.unwrap();

    let ledger = engine.ledger();
    let tree = engine.tree();
    let (taken, live_dump, live_root) = {
        let ledger = ledger.lock().await;
        let tree = tree.lock().await;
        let taken = snapshots.take_snapshot(&*ledger, &*tree).unwrap();
        (taken, ledger.export_dump().unwrap(), tree.root())
    };

    // block 3 only staged a leaf, so the last full commit is block 2
    assert_eq!(taken, tei(2));
    assert_eq!(ledger.lock().await.export_dump().unwrap(), live_dump);
    assert_eq!(ledger.lock().await.current_tei().unwrap(), Some(tei(3)));
    assert_eq!(tree.lock().await.uncommitted_len(), 1);

    let snapshot = snapshots.load_snapshot(taken).unwrap();
    assert_eq!(snapshot.tei, tei(2));
    assert!(snapshot.tree.uncommitted_leaves.is_empty());
    assert_eq!(snapshot.tree.root.hash, live_root);
}

#[tokio::test]
async fn restoring_a_snapshot_and_resyncing_reaches_the_same_state() {
    let (engine, snapshots) = engine_with_snapshots(0);
    engine.sync(SyncOpts::default()).await.unwrap();
    let synced_root = engine.root().await;
    {
        let ledger = engine.ledger();
        let tree = engine.tree();
        let ledger = ledger.lock().await;
        let tree = tree.lock().await;
        snapshots.take_snapshot(&*ledger, &*tree).unwrap();
    }

    let restored = engine.restore_latest_snapshot(tei(3)).await.unwrap();
    assert_eq!(restored, Some(tei(2)));
    assert_eq!(engine.ledger().lock().await.current_tei().unwrap(), Some(tei(2)));
    assert_eq!(engine.tree().lock().await.uncommitted_len(), 0);

    let report = engine.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(report.diffs_applied, 1);
    assert_eq!(engine.root().await, synced_root);
    assert_eq!(engine.tree().lock().await.uncommitted_len(), 1);

    let everything = GetNotesOpts {
        include_uncommitted: true,
        ..Default::default()
    };
    let ledger = engine.ledger();
    let ledger = ledger.lock().await;
    assert_eq!(ledger.get_balance_for_asset(&token(), everything).unwrap(), 107);
    assert_eq!(ledger.current_tei().unwrap(), Some(tei(3)));
}

#[tokio::test]
async fn engine_snapshots_on_interval() {
    let (engine, snapshots) = engine_with_snapshots(1);
    engine.sync(SyncOpts::default()).await.unwrap();

    assert_eq!(snapshots.list_snapshots().unwrap(), vec![tei(1), tei(2)]);
    assert_eq!(snapshots.latest_snapshot_at_or_before(tei(1)).unwrap(), Some(tei(1)));
    assert_eq!(snapshots.latest_snapshot_at_or_before(tei(9)).unwrap(), Some(tei(2)));
    assert_eq!(
        snapshots.latest_snapshot_at_or_before(TotalEntityIndex::ZERO).unwrap(),
        None
    );

    assert_eq!(snapshots.remove_snapshots_before(tei(2)).unwrap(), 1);
    assert_eq!(snapshots.list_snapshots().unwrap(), vec![tei(2)]);
    assert_eq!(engine.restore_latest_snapshot(tei(1)).await.unwrap(), None);
}

#[test]
fn snapshot_before_any_commit_is_keyed_at_zero() {
    let snapshots = SnapshotStore::new(Arc::new(MemoryKvStore::new()));
    let ledger = NoteLedger::new(Arc::new(MemoryKvStore::new()));
    ledger
        .apply_state_diff(&diff(4, vec![owned_note(token(), 9, 0)], Vec::new(), None))
        .unwrap();
    let mut tree = MerkleAccumulator::new();
    tree.insert_uncommitted(0, [5u8; 32], true).unwrap();

    let taken = snapshots.take_snapshot(&ledger, &tree).unwrap();
    assert_eq!(taken, TotalEntityIndex::ZERO);
    assert_eq!(tree.uncommitted_len(), 1);

    let fresh = NoteLedger::new(Arc::new(MemoryKvStore::new()));
    let mut fresh_tree = MerkleAccumulator::new();
    snapshots.restore_snapshot(taken, &fresh, &mut fresh_tree).unwrap();
    assert_eq!(fresh.current_tei().unwrap(), None);
    assert_eq!(fresh_tree.total_count(), 0);
}

#[test]
fn missing_snapshot_is_reported() {
    let snapshots = SnapshotStore::new(Arc::new(MemoryKvStore::new()));
    let err = snapshots.load_snapshot(tei(1)).unwrap_err();
    assert!(matches!(err, CoreError::MissingRecord(_)));
    assert!(snapshots.list_snapshots().unwrap().is_empty());
}
