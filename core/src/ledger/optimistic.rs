//! Optimistic nullifier overlay.
//!
//! When the client builds a spend it marks the selected notes as tentatively
//! spent until the chain either confirms them (a real nullifier arrives) or
//! the entry expires. Expiry is unconditional: the overlay only keeps the
//! wallet from double-selecting while a spend is in flight.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use shroud_privacy::{Asset, Nullifier, StealthAddress};
use tracing::{debug, info};

use super::{NoteLedger, OPTIMISTIC_NF_PREFIX, OPTIMISTIC_OP_PREFIX, index_from_key, optimistic_nf_key};
use crate::error::{CoreError, Result};
use crate::storage::{KvBatch, KvExt, KvStore};

/// Identifier of a locally initiated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpDigest(pub [u8; 32]);

impl OpDigest {
    /// Digest over the nullifiers an operation spends
    pub fn from_nullifiers(nullifiers: &[Nullifier]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shroud-op");
        for nf in nullifiers {
            hasher.update(nf.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for OpDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpMetadataItem {
    pub asset: Asset,
    pub amount: u128,
    pub recipient: Option<StealthAddress>,
}

/// What the operation was meant to do, for history display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpMetadata {
    pub items: Vec<OpMetadataItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticOpRecord {
    /// Unix time in milliseconds after which the record is dropped
    pub expiration_ms: u64,
    pub merkle_indices: Vec<u64>,
    pub metadata: Option<OpMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticNfRecord {
    pub merkle_index: u64,
    pub nullifier: Nullifier,
    pub expiration_ms: u64,
}

fn op_key(op_id: &OpDigest) -> String {
    format!("{OPTIMISTIC_OP_PREFIX}{}", op_id.to_hex())
}

impl<S: KvStore> NoteLedger<S> {
    /// Install the overlay for one pending operation
    pub fn store_optimistic_records(
        &self,
        op_id: OpDigest,
        record: &OptimisticOpRecord,
        nf_records: &[OptimisticNfRecord],
    ) -> Result<()> {
        let mut batch = KvBatch::new();
        batch.put_json(op_key(&op_id), record)?;
        for nf in nf_records {
            batch.put_json(optimistic_nf_key(nf.merkle_index), nf)?;
        }
        self.store.apply(batch)?;

        debug!(op = %op_id, notes = nf_records.len(), "Stored optimistic records");
        Ok(())
    }

    /// Drop an operation and the overlay entries it installed
    pub fn remove_optimistic_records_for_op(&self, op_id: &OpDigest) -> Result<()> {
        let record = self.optimistic_op(op_id)?;

        let mut batch = KvBatch::new();
        batch.remove(op_key(op_id));
        for index in &record.merkle_indices {
            batch.remove(optimistic_nf_key(*index));
        }
        self.store.apply(batch)?;
        Ok(())
    }

    pub fn optimistic_op(&self, op_id: &OpDigest) -> Result<OptimisticOpRecord> {
        self.store
            .get_json(&op_key(op_id))?
            .ok_or_else(|| CoreError::MissingRecord(op_key(op_id)))
    }

    pub fn optimistic_ops(&self) -> Result<Vec<(OpDigest, OptimisticOpRecord)>> {
        let mut ops = Vec::new();
        for (key, bytes) in self.store.iter_prefix(OPTIMISTIC_OP_PREFIX)? {
            let hex_id = &key[OPTIMISTIC_OP_PREFIX.len()..];
            let mut id = [0u8; 32];
            hex::decode_to_slice(hex_id, &mut id)
                .map_err(|e| CoreError::MissingRecord(format!("{key}: {e}")))?;
            ops.push((OpDigest(id), serde_json::from_slice(&bytes)?));
        }
        Ok(ops)
    }

    pub fn optimistic_nf_records(&self) -> Result<Vec<OptimisticNfRecord>> {
        self.store
            .iter_prefix(OPTIMISTIC_NF_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| Ok(serde_json::from_slice(&bytes)?))
            .collect()
    }

    /// Indices currently covered by the overlay. Expiry is not checked here;
    /// that is the sweeper's job.
    pub fn optimistic_nullifier_indices(&self) -> Result<BTreeSet<u64>> {
        self.store
            .iter_prefix(OPTIMISTIC_NF_PREFIX)?
            .into_iter()
            .map(|(key, _)| index_from_key(&key))
            .collect()
    }

    /// Evict every overlay entry with `expiration_ms <= now_ms`, along with
    /// expired operation records. Returns the number of evicted nullifier
    /// entries.
    pub fn prune_optimistic_nullifiers(&self, now_ms: u64) -> Result<usize> {
        let mut batch = KvBatch::new();
        let mut evicted = 0;

        for nf in self.optimistic_nf_records()? {
            if nf.expiration_ms <= now_ms {
                batch.remove(optimistic_nf_key(nf.merkle_index));
                evicted += 1;
            }
        }
        for (op_id, record) in self.optimistic_ops()? {
            if record.expiration_ms <= now_ms {
                batch.remove(op_key(&op_id));
            }
        }

        if !batch.is_empty() {
            self.store.apply(batch)?;
            info!(evicted, now_ms, "Pruned expired optimistic nullifiers");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_digest_depends_on_nullifier_order() {
        let a = Nullifier([1u8; 32]);
        let b = Nullifier([2u8; 32]);
        assert_eq!(OpDigest::from_nullifiers(&[a, b]), OpDigest::from_nullifiers(&[a, b]));
        assert_ne!(OpDigest::from_nullifiers(&[a, b]), OpDigest::from_nullifiers(&[b, a]));
        assert_eq!(OpDigest([0xab; 32]).to_hex().len(), 64);
    }
}
