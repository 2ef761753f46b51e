use std::sync::Arc;
use std::time::Duration;

use shroud_config::SyncConfig;
use shroud_privacy::{Hash, IncludedNoteOrCommitment, MerkleAccumulator};
use tokio_util::sync::CancellationToken;

use super::{MockViewer, encrypt_for, me, note_for, raw_diff, someone_else, tei, token, viewer};
use crate::ledger::{NoteLedger, OpDigest, OptimisticNfRecord, OptimisticOpRecord};
use crate::storage::{MemoryKvStore, TreeStore};
use crate::sync::{
    DeltaSource, InMemoryDeltaSource, IterStateDiffsOpts, OptimisticSweeper, RawNoteEntry,
    RawStateDiff, StateDiffStream, SyncEngine, SyncOpts, channel, decrypt_state_diff,
    unix_time_ms,
};
use crate::types::{GetNotesOpts, TotalEntityIndex};

type Engine = SyncEngine<MemoryKvStore, InMemoryDeltaSource, MockViewer>;

/// Block 1: my encrypted note (50), a foreign commitment, my plaintext
/// note (30), all committed. Block 2: a note sealed for someone else and
/// my note (20), committed. Block 3: one more note of mine, staged only.
pub(super) fn chain() -> Vec<RawStateDiff> {
    let foreign = note_for(someone_else(), token(), 999, 1);
    vec![
        raw_diff(
            1,
            vec![
                encrypt_for(&note_for(me(), token(), 50, 0), 0),
                RawNoteEntry::Commitment {
                    merkle_index: 1,
                    commitment: foreign.commitment(),
                },
                RawNoteEntry::Plaintext(note_for(me(), token(), 30, 2).included(2)),
            ],
            Some(2),
        ),
        raw_diff(
            2,
            vec![
                encrypt_for(&note_for(someone_else(), token(), 5, 3), 3),
                encrypt_for(&note_for(me(), token(), 20, 4), 4),
            ],
            Some(4),
        ),
        raw_diff(3, vec![encrypt_for(&note_for(me(), token(), 7, 5), 5)], None),
    ]
}

fn leaves(diffs: &[RawStateDiff]) -> Vec<Hash> {
    let v = viewer();
    diffs
        .iter()
        .flat_map(|raw| decrypt_state_diff(raw.clone(), &v).notes_and_commitments)
        .map(|e| e.commitment().0)
        .collect()
}

fn engine_over(store: Arc<MemoryKvStore>, latest_block: u64, config: SyncConfig) -> Engine {
    let source = InMemoryDeltaSource::new(chain(), latest_block).with_buffer(config.stream_buffer);
    SyncEngine::open(store, source, viewer(), config).unwrap()
}

fn engine(latest_block: u64) -> Engine {
    engine_over(Arc::new(MemoryKvStore::new()), latest_block, SyncConfig::default())
}

#[test]
fn decrypt_keeps_only_our_matching_notes() {
    let mine = note_for(me(), token(), 10, 0);
    let mut tampered = encrypt_for(&note_for(me(), token(), 11, 3), 3);
    if let RawNoteEntry::Encrypted { commitment, .. } = &mut tampered {
        *commitment = mine.commitment();
    }

    let raw = raw_diff(
        1,
        vec![
            RawNoteEntry::Plaintext(note_for(someone_else(), token(), 1, 2).included(2)),
            encrypt_for(&note_for(someone_else(), token(), 1, 1), 1),
            encrypt_for(&mine, 0),
            tampered,
        ],
        None,
    );
    let diff = decrypt_state_diff(raw, &viewer());

    let kinds: Vec<(u64, bool)> = diff
        .notes_and_commitments
        .iter()
        .map(|e| (e.merkle_index(), e.as_note().is_some()))
        .collect();
    assert_eq!(kinds, vec![(0, true), (1, false), (2, false), (3, false)]);

    match diff.notes_and_commitments[0] {
        IncludedNoteOrCommitment::Note(n) => assert_eq!(n.value(), 10),
        IncludedNoteOrCommitment::Commitment(_) => panic!("expected an owned note"),
    }
}

#[tokio::test]
async fn sync_folds_diffs_into_ledger_and_tree() {
    let engine = engine(3);
    let report = engine.sync(SyncOpts::default()).await.unwrap();

    assert_eq!(report.diffs_applied, 3);
    assert_eq!(report.latest_tei, Some(tei(3)));
    assert!(!report.cancelled);

    let ledger = engine.ledger();
    let ledger = ledger.lock().await;
    assert_eq!(ledger.current_tei().unwrap(), Some(tei(3)));
    assert_eq!(ledger.get_balance_for_asset(&token(), GetNotesOpts::default()).unwrap(), 100);
    let everything = GetNotesOpts {
        include_uncommitted: true,
        ..Default::default()
    };
    assert_eq!(ledger.get_balance_for_asset(&token(), everything).unwrap(), 107);

    let tree = engine.tree();
    let tree = tree.lock().await;
    assert_eq!(tree.count(), 5);
    assert_eq!(tree.uncommitted_len(), 1);
    assert_eq!(tree.retained_indices(), vec![0, 2, 4]);

    let all = leaves(&chain());
    let mut reference = MerkleAccumulator::new();
    reference.insert_batch(0, &all[..5], &[false; 5]).unwrap();
    assert_eq!(tree.root(), reference.root());
}

#[tokio::test]
async fn sync_applies_diffs_with_wide_log_indices() {
    let mut raw = raw_diff(1, vec![encrypt_for(&note_for(me(), token(), 9, 0), 0)], Some(0));
    raw.total_entity_index = TotalEntityIndex::from_parts(1, 4, 70_000, 2);
    let source = InMemoryDeltaSource::new(vec![raw], 10);
    let engine = SyncEngine::open(Arc::new(MemoryKvStore::new()), source, viewer(), SyncConfig::default())
        .unwrap();

    let report = engine.sync(SyncOpts { to_block: Some(10) }).await.unwrap();
    assert_eq!(report.diffs_applied, 1);
    assert_eq!(report.latest_tei, Some(TotalEntityIndex::from_parts(1, 4, 70_000, 2)));
    assert_eq!(
        engine
            .ledger()
            .lock()
            .await
            .get_balance_for_asset(&token(), GetNotesOpts::default())
            .unwrap(),
        9
    );
}

#[tokio::test]
async fn sync_stops_at_finality_depth() {
    let config = SyncConfig {
        finality_blocks: 1,
        ..Default::default()
    };
    let engine = engine_over(Arc::new(MemoryKvStore::new()), 3, config.clone());
    let report = engine.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(report.latest_tei, Some(tei(2)));

    let shallow = engine_over(
        Arc::new(MemoryKvStore::new()),
        3,
        SyncConfig {
            finality_blocks: 10,
            ..config
        },
    );
    let report = shallow.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(report.diffs_applied, 0);
    assert_eq!(report.latest_tei, None);
}

#[tokio::test]
async fn sync_resumes_from_persisted_state() {
    let store = Arc::new(MemoryKvStore::new());

    let first = engine_over(Arc::clone(&store), 3, SyncConfig::default());
    let report = first
        .sync(SyncOpts { to_block: Some(1) })
        .await
        .unwrap();
    assert_eq!(report.diffs_applied, 1);
    drop(first);

    let resumed = engine_over(Arc::clone(&store), 3, SyncConfig::default());
    assert_eq!(resumed.tree().lock().await.count(), 3);
    let report = resumed.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(report.diffs_applied, 2);

    let straight = engine(3);
    straight.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(resumed.root().await, straight.root().await);

    // Nothing new
    let report = resumed.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(report.diffs_applied, 0);
}

#[tokio::test]
async fn reapplying_a_diff_leaves_the_tree_alone() {
    let engine = engine(3);
    let diff = decrypt_state_diff(chain().remove(0), &viewer());

    engine.apply_diff(&diff).await.unwrap();
    let root = engine.root().await;
    let dump = engine.ledger().lock().await.export_dump().unwrap();

    engine.apply_diff(&diff).await.unwrap();
    assert_eq!(engine.root().await, root);
    assert_eq!(engine.tree().lock().await.count(), 3);
    assert_eq!(engine.ledger().lock().await.export_dump().unwrap(), dump);
}

#[tokio::test]
async fn nullified_notes_are_released_from_the_tree() {
    let engine = engine(3);
    engine.sync(SyncOpts { to_block: Some(2) }).await.unwrap();

    let spent = engine.ledger().lock().await.note_by_index(2).unwrap().unwrap();
    let mut spend = raw_diff(3, Vec::new(), None);
    spend.nullifiers = vec![spent.nullifier];

    let nullified = engine
        .apply_diff(&decrypt_state_diff(spend, &viewer()))
        .await
        .unwrap();
    assert_eq!(nullified, vec![2]);

    let tree = engine.tree();
    let tree = tree.lock().await;
    assert!(!tree.is_retained(2));
    assert!(tree.get_proof(2).is_err());
    assert!(tree.get_proof(0).unwrap().verify());
}

#[tokio::test]
async fn commit_boundary_past_staged_leaves_commits_what_is_there() {
    let engine = engine(3);
    let raw = raw_diff(
        1,
        vec![encrypt_for(&note_for(me(), token(), 1, 0), 0)],
        Some(4),
    );

    engine
        .apply_diff(&decrypt_state_diff(raw, &viewer()))
        .await
        .unwrap();
    let tree = engine.tree();
    let tree = tree.lock().await;
    assert_eq!(tree.count(), 1);
    assert_eq!(tree.uncommitted_len(), 0);
}

#[tokio::test]
async fn cancelled_engine_does_not_pull() {
    let engine = engine(3);
    engine.cancel_token().cancel();

    let report = engine.sync(SyncOpts::default()).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.diffs_applied, 0);
    assert_eq!(engine.ledger().lock().await.current_tei().unwrap(), None);
}

#[tokio::test]
async fn tree_is_persisted_after_each_diff() {
    let store = Arc::new(MemoryKvStore::new());
    let engine = engine_over(Arc::clone(&store), 3, SyncConfig::default());
    engine.sync(SyncOpts::default()).await.unwrap();

    let loaded = TreeStore::new(store).load().unwrap().unwrap();
    assert_eq!(loaded.root(), engine.root().await);
    assert_eq!(loaded.uncommitted_len(), 1);
}

#[tokio::test]
async fn reopened_engine_proves_every_note_the_ledger_reports() {
    let store = Arc::new(MemoryKvStore::new());
    let first = engine_over(Arc::clone(&store), 3, SyncConfig::default());
    first.sync(SyncOpts { to_block: Some(2) }).await.unwrap();
    let root = first.root().await;
    drop(first);

    let reopened = engine_over(Arc::clone(&store), 3, SyncConfig::default());
    assert_eq!(reopened.root().await, root);
    {
        let ledger = reopened.ledger();
        let ledger = ledger.lock().await;
        let tree = reopened.tree();
        let tree = tree.lock().await;
        let spendable = ledger
            .get_notes_for_asset(&token(), GetNotesOpts::default())
            .unwrap();
        assert_eq!(spendable.len(), 3);
        for note in &spendable {
            assert!(tree.get_proof(note.merkle_index).unwrap().verify());
        }
    }

    let report = reopened.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(report.diffs_applied, 1);
}

/// Hands out one pre-built stream, fed by the test
struct GatedSource {
    stream: std::sync::Mutex<Option<StateDiffStream>>,
}

impl DeltaSource for GatedSource {
    async fn latest_indexed_block(&self) -> anyhow::Result<u64> {
        Ok(3)
    }

    fn iter_state_diffs(&self, _from: TotalEntityIndex, _opts: IterStateDiffsOpts) -> StateDiffStream {
        self.stream
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| channel(1).1)
    }
}

#[tokio::test]
async fn cancelling_mid_stream_stops_between_diffs_and_resumes() {
    let store = Arc::new(MemoryKvStore::new());
    let (tx, stream) = channel(1);
    let gated = SyncEngine::open(
        Arc::clone(&store),
        GatedSource {
            stream: std::sync::Mutex::new(Some(stream)),
        },
        viewer(),
        SyncConfig::default(),
    )
    .unwrap();
    let cancel = gated.cancel_token();

    let feed = async {
        assert!(tx.send(Ok(chain().remove(0))).await);
        loop {
            if gated.ledger().lock().await.current_tei().unwrap() == Some(tei(1)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
    };
    let (report, ()) = tokio::join!(gated.sync(SyncOpts::default()), feed);
    let report = report.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.diffs_applied, 1);
    assert_eq!(report.latest_tei, Some(tei(1)));
    assert!(!tx.send(Ok(chain().remove(1))).await);

    {
        let ledger = gated.ledger();
        let ledger = ledger.lock().await;
        let tree = gated.tree();
        let tree = tree.lock().await;
        assert_eq!(tree.count(), 3);
        assert_eq!(tree.uncommitted_len(), 0);
        let indices: Vec<u64> = ledger
            .get_notes_for_asset(&token(), GetNotesOpts::default())
            .unwrap()
            .iter()
            .map(|n| n.merkle_index)
            .collect();
        assert_eq!(indices.len(), 2);
        for index in indices {
            assert!(tree.get_proof(index).unwrap().verify());
        }
    }
    drop(gated);

    let resumed = engine_over(Arc::clone(&store), 3, SyncConfig::default());
    let report = resumed.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(report.diffs_applied, 2);

    let straight = engine(3);
    straight.sync(SyncOpts::default()).await.unwrap();
    assert_eq!(resumed.root().await, straight.root().await);
}

#[tokio::test]
async fn sweeper_evicts_expired_overlay_entries() {
    let ledger = Arc::new(tokio::sync::Mutex::new(NoteLedger::new(Arc::new(
        MemoryKvStore::new(),
    ))));
    {
        let ledger = ledger.lock().await;
        let op_id = OpDigest([7u8; 32]);
        let record = OptimisticOpRecord {
            expiration_ms: 1,
            merkle_indices: vec![0],
            metadata: None,
        };
        let nf = OptimisticNfRecord {
            merkle_index: 0,
            nullifier: shroud_privacy::Nullifier([3u8; 32]),
            expiration_ms: 1,
        };
        ledger.store_optimistic_records(op_id, &record, &[nf]).unwrap();
        assert!(unix_time_ms() > 1);
    }

    let cancel = CancellationToken::new();
    let handle = OptimisticSweeper::spawn(Arc::clone(&ledger), Duration::from_millis(10), cancel.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();
    handle.await.unwrap();

    let ledger = ledger.lock().await;
    assert!(ledger.optimistic_nf_records().unwrap().is_empty());
    assert!(ledger.optimistic_ops().unwrap().is_empty());
}
