//! Note Ledger
//!
//! Authoritative record of the notes this client owns and where they sit in
//! the accumulator, kept entirely in a [`KvStore`].
//!
//! ```text
//! notes/<index>            → IncludedNoteWithNullifier (kept after spend)
//! nf/<nullifier>           → index          (unspent notes only)
//! asset/<asset>/<index>    → ()             (unspent notes only)
//! tei/<index>              → TEI the note was synced at
//! onf/<index>              → OptimisticNfRecord
//! oop/<op id>              → OptimisticOpRecord
//! cursor/*                 → sync cursors
//! ```
//!
//! Writers are serialized by the caller: every ledger lives behind exactly
//! one `Arc<tokio::sync::Mutex<_>>`.

mod optimistic;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use shroud_privacy::{Asset, IncludedNoteWithNullifier, Nullifier};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::storage::{KvBatch, KvExt, KvStore};
use crate::types::{GetNotesOpts, StateDiff, TotalEntityIndex};

pub use optimistic::{OpDigest, OpMetadata, OpMetadataItem, OptimisticNfRecord, OptimisticOpRecord};

const NOTES_PREFIX: &str = "notes/";
const NULLIFIER_PREFIX: &str = "nf/";
const ASSET_PREFIX: &str = "asset/";
const TEI_PREFIX: &str = "tei/";
const OPTIMISTIC_NF_PREFIX: &str = "onf/";
const OPTIMISTIC_OP_PREFIX: &str = "oop/";
const CURSOR_PREFIX: &str = "cursor/";

const CURRENT_TEI_KEY: &str = "cursor/current_tei";
const LATEST_COMMIT_TEI_KEY: &str = "cursor/latest_commit_tei";
const LATEST_SYNCED_KEY: &str = "cursor/latest_synced_index";
const LATEST_COMMITTED_KEY: &str = "cursor/latest_committed_index";

/// Every key family the ledger owns
const LEDGER_PREFIXES: [&str; 7] = [
    NOTES_PREFIX,
    NULLIFIER_PREFIX,
    ASSET_PREFIX,
    TEI_PREFIX,
    OPTIMISTIC_NF_PREFIX,
    OPTIMISTIC_OP_PREFIX,
    CURSOR_PREFIX,
];

fn note_key(index: u64) -> String {
    format!("{NOTES_PREFIX}{index:016x}")
}

fn nullifier_key(nullifier: &Nullifier) -> String {
    format!("{NULLIFIER_PREFIX}{}", hex::encode(nullifier.as_bytes()))
}

fn asset_prefix(asset: &Asset) -> String {
    format!(
        "{ASSET_PREFIX}{:02x}{}{}/",
        asset.kind as u8,
        hex::encode(asset.contract),
        hex::encode(asset.id)
    )
}

fn asset_key(asset: &Asset, index: u64) -> String {
    format!("{}{index:016x}", asset_prefix(asset))
}

fn tei_key(index: u64) -> String {
    format!("{TEI_PREFIX}{index:016x}")
}

fn optimistic_nf_key(index: u64) -> String {
    format!("{OPTIMISTIC_NF_PREFIX}{index:016x}")
}

/// Merkle index encoded as the last path segment of a key
fn index_from_key(key: &str) -> Result<u64> {
    let suffix = key.rsplit('/').next().unwrap_or(key);
    let index = u64::from_str_radix(suffix, 16)
        .with_context(|| format!("malformed index in ledger key {key}"))?;
    Ok(index)
}

/// Raw copy of every ledger entry, values hex encoded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDump {
    pub entries: Vec<(String, String)>,
}

pub struct NoteLedger<S> {
    store: Arc<S>,
}

impl<S: KvStore> NoteLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Notes & nullifiers
    // =========================================================================

    /// Record owned notes synced at `tei`.
    ///
    /// A note whose index is already known is skipped, so storing twice is a
    /// no-op and a spent note is never brought back.
    pub fn store_notes(
        &self,
        notes: &[IncludedNoteWithNullifier],
        tei: TotalEntityIndex,
    ) -> Result<usize> {
        let keys: Vec<String> = notes.iter().map(|n| note_key(n.merkle_index)).collect();
        let existing = self.store.get_many(&keys)?;

        let mut batch = KvBatch::new();
        let mut stored = 0;
        for ((note, key), existing) in notes.iter().zip(keys).zip(existing) {
            if existing.is_some() {
                continue;
            }
            batch.put_json(key, note)?;
            batch.put(
                nullifier_key(&note.nullifier),
                note.merkle_index.to_be_bytes().to_vec(),
            );
            batch.put(asset_key(note.asset(), note.merkle_index), Vec::new());
            batch.put(tei_key(note.merkle_index), tei.0.to_be_bytes().to_vec());
            stored += 1;
        }

        if !batch.is_empty() {
            self.store.apply(batch)?;
            debug!(stored, tei = %tei, "Stored notes");
        }
        Ok(stored)
    }

    /// Mark notes spent. Unknown nullifiers are ignored.
    ///
    /// Returns the affected merkle indices in ascending order.
    pub fn nullify_notes(&self, nullifiers: &[Nullifier]) -> Result<Vec<u64>> {
        let mut batch = KvBatch::new();
        let mut indices = BTreeSet::new();

        for nullifier in nullifiers {
            let key = nullifier_key(nullifier);
            let Some(index) = self.store.get_u64(&key)? else {
                continue;
            };
            if !indices.insert(index) {
                continue;
            }
            let note = self
                .note_by_index(index)?
                .ok_or_else(|| CoreError::MissingRecord(note_key(index)))?;

            batch.remove(key);
            batch.remove(asset_key(note.asset(), index));
            batch.remove(optimistic_nf_key(index));
        }

        if !batch.is_empty() {
            self.store.apply(batch)?;
            debug!(count = indices.len(), "Nullified notes");
        }
        Ok(indices.into_iter().collect())
    }

    pub fn note_by_index(&self, index: u64) -> Result<Option<IncludedNoteWithNullifier>> {
        Ok(self.store.get_json(&note_key(index))?)
    }

    /// TEI at which the note at `index` was synced
    pub fn note_tei(&self, index: u64) -> Result<Option<TotalEntityIndex>> {
        Ok(self.store.get_u128(&tei_key(index))?.map(TotalEntityIndex))
    }

    /// Whether `nullifier` belongs to an unspent note of this ledger
    pub fn has_nullifier(&self, nullifier: &Nullifier) -> Result<bool> {
        Ok(self.store.get(&nullifier_key(nullifier))?.is_some())
    }

    /// Number of unspent notes
    pub fn nullifier_count(&self) -> Result<usize> {
        Ok(self.store.iter_prefix(NULLIFIER_PREFIX)?.len())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_notes_for_asset(
        &self,
        asset: &Asset,
        opts: GetNotesOpts,
    ) -> Result<Vec<IncludedNoteWithNullifier>> {
        let indices = self
            .store
            .iter_prefix(&asset_prefix(asset))?
            .into_iter()
            .map(|(key, _)| index_from_key(&key))
            .collect::<Result<Vec<u64>>>()?;

        self.load_filtered(indices, opts)
    }

    pub fn get_balance_for_asset(&self, asset: &Asset, opts: GetNotesOpts) -> Result<u128> {
        Ok(self
            .get_notes_for_asset(asset, opts)?
            .iter()
            .map(|n| n.value() as u128)
            .sum())
    }

    /// Unspent notes grouped by asset, each group sorted by merkle index
    pub fn get_all_notes(
        &self,
        opts: GetNotesOpts,
    ) -> Result<BTreeMap<Asset, Vec<IncludedNoteWithNullifier>>> {
        let indices = self
            .store
            .iter_prefix(ASSET_PREFIX)?
            .into_iter()
            .map(|(key, _)| index_from_key(&key))
            .collect::<Result<Vec<u64>>>()?;

        let mut grouped: BTreeMap<Asset, Vec<IncludedNoteWithNullifier>> = BTreeMap::new();
        for note in self.load_filtered(indices, opts)? {
            grouped.entry(*note.asset()).or_default().push(note);
        }
        Ok(grouped)
    }

    fn load_filtered(
        &self,
        indices: Vec<u64>,
        opts: GetNotesOpts,
    ) -> Result<Vec<IncludedNoteWithNullifier>> {
        let committed = self.latest_committed_merkle_index()?;
        let overlay = if opts.ignore_optimistic_nfs {
            BTreeSet::new()
        } else {
            self.optimistic_nullifier_indices()?
        };

        let keys: Vec<String> = indices
            .into_iter()
            .filter(|idx| opts.include_uncommitted || committed.is_some_and(|c| *idx <= c))
            .filter(|idx| !overlay.contains(idx))
            .map(note_key)
            .collect();

        let mut notes = Vec::with_capacity(keys.len());
        for (key, bytes) in keys.iter().zip(self.store.get_many(&keys)?) {
            let bytes = bytes.ok_or_else(|| CoreError::MissingRecord(key.clone()))?;
            notes.push(serde_json::from_slice(&bytes)?);
        }
        Ok(notes)
    }

    // =========================================================================
    // Cursors
    // =========================================================================

    /// TEI of the last applied diff
    pub fn current_tei(&self) -> Result<Option<TotalEntityIndex>> {
        Ok(self.store.get_u128(CURRENT_TEI_KEY)?.map(TotalEntityIndex))
    }

    /// TEI at which the synced leaves were last fully committed
    pub fn latest_commit_tei(&self) -> Result<Option<TotalEntityIndex>> {
        Ok(self.store.get_u128(LATEST_COMMIT_TEI_KEY)?.map(TotalEntityIndex))
    }

    pub fn latest_synced_merkle_index(&self) -> Result<Option<u64>> {
        Ok(self.store.get_u64(LATEST_SYNCED_KEY)?)
    }

    pub fn latest_committed_merkle_index(&self) -> Result<Option<u64>> {
        Ok(self.store.get_u64(LATEST_COMMITTED_KEY)?)
    }

    // =========================================================================
    // State diffs
    // =========================================================================

    /// Fold one diff into the ledger and return the indices it nullified.
    ///
    /// Diffs behind the current TEI are rejected; the diff at the current TEI
    /// may be applied again and changes nothing.
    pub fn apply_state_diff(&self, diff: &StateDiff) -> Result<Vec<u64>> {
        let tei = diff.total_entity_index;
        self.ensure_tei_not_behind(tei)?;

        let notes: Vec<IncludedNoteWithNullifier> = diff
            .notes_and_commitments
            .iter()
            .filter_map(|entry| entry.as_note().copied())
            .collect();
        self.store_notes(&notes, tei)?;

        let nullified = self.nullify_notes(&diff.nullifiers)?;

        let newest_entry = diff
            .notes_and_commitments
            .iter()
            .map(|e| e.merkle_index())
            .max();
        let synced = self
            .latest_synced_merkle_index()?
            .max(diff.latest_newly_synced_merkle_index)
            .max(newest_entry);
        let committed = self
            .latest_committed_merkle_index()?
            .max(diff.latest_committed_merkle_index);

        let previous_commit_tei = self.latest_commit_tei()?;
        let commit_tei = match diff.latest_commit_tei {
            Some(reported) => previous_commit_tei.max(Some(reported)),
            None if committed.is_some() && committed >= synced => {
                previous_commit_tei.max(Some(tei))
            }
            None => previous_commit_tei,
        };

        let mut batch = KvBatch::new();
        batch.put(CURRENT_TEI_KEY, tei.0.to_be_bytes().to_vec());
        if let Some(synced) = synced {
            batch.put(LATEST_SYNCED_KEY, synced.to_be_bytes().to_vec());
        }
        if let Some(committed) = committed {
            batch.put(LATEST_COMMITTED_KEY, committed.to_be_bytes().to_vec());
        }
        if let Some(commit_tei) = commit_tei {
            batch.put(LATEST_COMMIT_TEI_KEY, commit_tei.0.to_be_bytes().to_vec());
        }
        self.store.apply(batch)?;

        debug!(
            tei = %tei,
            notes = notes.len(),
            nullified = nullified.len(),
            ?synced,
            ?committed,
            "Applied state diff"
        );
        Ok(nullified)
    }

    /// Reject a diff older than the last applied one
    pub fn ensure_tei_not_behind(&self, tei: TotalEntityIndex) -> Result<()> {
        match self.current_tei()? {
            Some(current) if tei < current => Err(CoreError::NonMonotonicTei {
                current,
                incoming: tei,
            }),
            _ => Ok(()),
        }
    }

    /// Move the sync cursors back to the last fully committed point, so a
    /// resync from there re-delivers everything after it
    pub(crate) fn rewind_to_last_commit(&self) -> Result<()> {
        let mut batch = KvBatch::new();
        match self.latest_commit_tei()? {
            Some(tei) => batch.put(CURRENT_TEI_KEY, tei.0.to_be_bytes().to_vec()),
            None => batch.remove(CURRENT_TEI_KEY),
        }
        match self.latest_committed_merkle_index()? {
            Some(index) => batch.put(LATEST_SYNCED_KEY, index.to_be_bytes().to_vec()),
            None => batch.remove(LATEST_SYNCED_KEY),
        }
        self.store.apply(batch)?;
        Ok(())
    }

    // =========================================================================
    // Dumps
    // =========================================================================

    pub fn export_dump(&self) -> Result<LedgerDump> {
        let mut entries = Vec::new();
        for prefix in LEDGER_PREFIXES {
            for (key, value) in self.store.iter_prefix(prefix)? {
                entries.push((key, hex::encode(value)));
            }
        }
        Ok(LedgerDump { entries })
    }

    /// Replace the whole ledger with `dump` in one batch
    pub fn import_dump(&self, dump: &LedgerDump) -> Result<()> {
        let mut batch = KvBatch::new();
        let mut incoming = BTreeSet::new();
        for (key, value) in &dump.entries {
            let bytes = hex::decode(value)
                .with_context(|| format!("invalid hex value for {key} in ledger dump"))?;
            batch.put(key.clone(), bytes);
            incoming.insert(key.as_str());
        }
        for prefix in LEDGER_PREFIXES {
            for (key, _) in self.store.iter_prefix(prefix)? {
                if !incoming.contains(key.as_str()) {
                    batch.remove(key);
                }
            }
        }
        self.store.apply(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sort_by_index() {
        assert!(note_key(9) < note_key(10));
        assert!(note_key(0xff) < note_key(0x100));
        assert_eq!(index_from_key(&note_key(0x1234)).unwrap(), 0x1234);
        assert!(index_from_key("notes/zz").is_err());
    }

    #[test]
    fn asset_keys_are_disjoint_per_asset() {
        let a = Asset::erc20([1u8; 20]);
        let b = Asset::erc20([2u8; 20]);
        assert!(!asset_key(&a, 1).starts_with(&asset_prefix(&b)));
        assert!(asset_key(&a, 1).starts_with(&asset_prefix(&a)));
        assert_eq!(index_from_key(&asset_key(&a, 77)).unwrap(), 77);
    }
}
