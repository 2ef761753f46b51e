//! Spend preparation.
//!
//! Selects notes, collects a membership proof for each and installs the
//! optimistic overlay so the same notes are not picked again while the
//! spend is in flight.

use std::collections::BTreeSet;
use std::time::Duration;

use shroud_privacy::{Asset, Hash, IncludedNoteWithNullifier, MerkleAccumulator, MerkleProof, Nullifier};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::ledger::{NoteLedger, OpDigest, OpMetadata, OptimisticNfRecord, OptimisticOpRecord};
use crate::selector::gather_notes;
use crate::storage::KvStore;
use crate::sync::unix_time_ms;
use crate::types::GetNotesOpts;
use crate::viewer::Viewer;

/// Notes chosen for one spend together with their proofs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSpend {
    pub asset: Asset,
    pub amount: u128,
    pub notes: Vec<IncludedNoteWithNullifier>,
    /// `proofs[i]` proves `notes[i]`
    pub proofs: Vec<MerkleProof>,
    /// Root every proof was taken against
    pub root: Hash,
    /// Selected value above `amount`
    pub change: u128,
    /// Nonce for the change note, if there is change
    pub change_nonce: Option<[u8; 32]>,
}

impl PreparedSpend {
    pub fn nullifiers(&self) -> Vec<Nullifier> {
        self.notes.iter().map(|n| n.nullifier).collect()
    }

    pub fn op_id(&self) -> OpDigest {
        OpDigest::from_nullifiers(&self.nullifiers())
    }
}

/// Select committed, unspent notes of `asset` covering `amount` and prove
/// each of them against the current root.
///
/// The caller must hold the ledger and the tree still for the duration,
/// see [`prepare_and_mark_spend`].
pub fn prepare_spend<S: KvStore, V: Viewer + ?Sized>(
    ledger: &NoteLedger<S>,
    tree: &MerkleAccumulator,
    viewer: &V,
    asset: &Asset,
    amount: u128,
    excluded: &BTreeSet<u64>,
) -> Result<PreparedSpend> {
    // Uncommitted notes cannot be proven
    let spendable = ledger.get_notes_for_asset(asset, GetNotesOpts::default())?;
    let notes = gather_notes(asset, &spendable, amount, excluded)?;

    let proofs = notes
        .iter()
        .map(|note| tree.get_proof(note.merkle_index))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let root = proofs.first().map_or_else(|| tree.root(), |p| p.root);
    ensure_common_root(&proofs, root)?;

    let selected: u128 = notes.iter().map(|n| n.value() as u128).sum();
    let change = selected.saturating_sub(amount);
    let change_nonce = match notes.first() {
        Some(first) if change > 0 => Some(viewer.generate_new_nonce(&first.nullifier)),
        _ => None,
    };

    Ok(PreparedSpend {
        asset: *asset,
        amount,
        notes,
        proofs,
        root,
        change,
        change_nonce,
    })
}

/// Every proof must have been taken against `expected`
pub fn ensure_common_root(proofs: &[MerkleProof], expected: Hash) -> Result<()> {
    match proofs.iter().find(|p| p.root != expected) {
        Some(p) => Err(CoreError::ProofRootMismatch {
            expected,
            found: p.root,
        }),
        None => Ok(()),
    }
}

/// Cover the spend's notes with the optimistic overlay until
/// `expiration_ms`. Returns the operation id the records are stored under.
pub fn mark_spend_pending<S: KvStore>(
    ledger: &NoteLedger<S>,
    spend: &PreparedSpend,
    expiration_ms: u64,
    metadata: Option<OpMetadata>,
) -> Result<OpDigest> {
    let op_id = spend.op_id();
    let record = OptimisticOpRecord {
        expiration_ms,
        merkle_indices: spend.notes.iter().map(|n| n.merkle_index).collect(),
        metadata,
    };
    let nf_records: Vec<OptimisticNfRecord> = spend
        .notes
        .iter()
        .map(|n| OptimisticNfRecord {
            merkle_index: n.merkle_index,
            nullifier: n.nullifier,
            expiration_ms,
        })
        .collect();

    ledger.store_optimistic_records(op_id, &record, &nf_records)?;
    Ok(op_id)
}

/// Prepare a spend and mark it pending as one step under the ledger and
/// tree locks, taken in that order.
#[allow(clippy::too_many_arguments)]
pub async fn prepare_and_mark_spend<S: KvStore, V: Viewer + ?Sized>(
    ledger: &Mutex<NoteLedger<S>>,
    tree: &Mutex<MerkleAccumulator>,
    viewer: &V,
    asset: &Asset,
    amount: u128,
    excluded: &BTreeSet<u64>,
    ttl: Duration,
    metadata: Option<OpMetadata>,
) -> Result<(OpDigest, PreparedSpend)> {
    let ledger = ledger.lock().await;
    let tree = tree.lock().await;

    let spend = prepare_spend(&*ledger, &*tree, viewer, asset, amount, excluded)?;
    let expiration_ms = unix_time_ms().saturating_add(ttl.as_millis() as u64);
    let op_id = mark_spend_pending(&*ledger, &spend, expiration_ms, metadata)?;

    info!(
        op = %op_id,
        notes = spend.notes.len(),
        amount,
        change = spend.change,
        "Prepared spend"
    );
    Ok((op_id, spend))
}
