//! Shared types for the ledger and the sync pipeline

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shroud_privacy::{IncludedNoteOrCommitment, Nullifier};

const BLOCK_SHIFT: u32 = 96;
const TX_SHIFT: u32 = 64;
const LOG_SHIFT: u32 = 32;

/// Global ordering key over chain events.
///
/// ```text
///  127         96 95         64 63         32 31          0
/// ┌─────────────┬─────────────┬─────────────┬─────────────┐
/// │ block number│  tx index   │  log index  │ event index │
/// └─────────────┴─────────────┴─────────────┴─────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TotalEntityIndex(pub u128);

impl TotalEntityIndex {
    pub const ZERO: Self = Self(0);

    pub fn from_parts(block: u32, tx: u32, log: u32, event: u32) -> Self {
        Self(
            (block as u128) << BLOCK_SHIFT
                | (tx as u128) << TX_SHIFT
                | (log as u128) << LOG_SHIFT
                | event as u128,
        )
    }

    /// Largest TEI any event of `block` can have. Blocks past the 32-bit
    /// field saturate to the largest TEI.
    pub fn last_of_block(block: u64) -> Self {
        match u32::try_from(block) {
            Ok(block) => Self::from_parts(block, u32::MAX, u32::MAX, u32::MAX),
            Err(_) => Self(u128::MAX),
        }
    }

    pub fn block_number(&self) -> u64 {
        (self.0 >> BLOCK_SHIFT) as u64
    }

    pub fn tx_index(&self) -> u32 {
        (self.0 >> TX_SHIFT) as u32
    }

    pub fn log_index(&self) -> u32 {
        (self.0 >> LOG_SHIFT) as u32
    }

    pub fn event_index(&self) -> u32 {
        self.0 as u32
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Fixed-width lowercase hex; lexicographic order equals numeric order
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(Self)
    }
}

impl fmt::Display for TotalEntityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for TotalEntityIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TotalEntityIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid total entity index: {s}")))
    }
}

/// Decrypted chain progress, ready to fold into the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    /// Sorted ascending by merkle index
    pub notes_and_commitments: Vec<IncludedNoteOrCommitment>,
    pub nullifiers: Vec<Nullifier>,
    pub latest_newly_synced_merkle_index: Option<u64>,
    pub latest_committed_merkle_index: Option<u64>,
    pub latest_commit_tei: Option<TotalEntityIndex>,
    pub total_entity_index: TotalEntityIndex,
}

impl StateDiff {
    /// A diff that only moves the TEI cursor
    pub fn empty(total_entity_index: TotalEntityIndex) -> Self {
        Self {
            notes_and_commitments: Vec::new(),
            nullifiers: Vec::new(),
            latest_newly_synced_merkle_index: None,
            latest_committed_merkle_index: None,
            latest_commit_tei: None,
            total_entity_index,
        }
    }
}

/// Filters for note queries. Both compose by intersection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetNotesOpts {
    /// Also return notes past the latest committed merkle index
    pub include_uncommitted: bool,
    /// Also return notes covered by the optimistic nullifier overlay
    pub ignore_optimistic_nfs: bool,
}
