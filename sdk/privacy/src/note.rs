//! Shielded Notes
//!
//! A Note represents value held privately in the pool.
//!
//! ```text
//! Note = {
//!     owner: StealthAddress, // (h1, h2) pair, rerandomizable
//!     nonce: [u8; 32],       // per-note uniqueness
//!     asset: Asset,          // (kind, contract, id)
//!     value: u64,            // amount in the smallest unit
//! }
//! ```
//!
//! Once its commitment lands in the accumulator a note becomes an
//! [`IncludedNote`]; once the owner has derived its nullifier it becomes an
//! [`IncludedNoteWithNullifier`], which is what the ledger stores.

use serde::{Deserialize, Serialize};

use crate::commitment::{Commitment, CommitmentScheme};
use crate::nullifier::Nullifier;

/// Token standard of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetKind {
    Erc20 = 0,
    Erc721 = 1,
    Erc1155 = 2,
}

/// An asset: token contract plus token id (zero for fungible tokens)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asset {
    pub kind: AssetKind,
    pub contract: [u8; 20],
    pub id: [u8; 32],
}

impl Asset {
    pub fn new(kind: AssetKind, contract: [u8; 20], id: [u8; 32]) -> Self {
        Self { kind, contract, id }
    }

    /// Fungible token asset (id is always zero)
    pub fn erc20(contract: [u8; 20]) -> Self {
        Self::new(AssetKind::Erc20, contract, [0u8; 32])
    }
}

/// Stealth address of a note owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StealthAddress {
    pub h1: [u8; 32],
    pub h2: [u8; 32],
}

/// Note value with overflow protection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteValue(pub u64);

impl NoteValue {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Checked addition
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

/// A shielded note representing privately held value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub owner: StealthAddress,
    pub nonce: [u8; 32],
    pub asset: Asset,
    pub value: NoteValue,
}

impl Note {
    /// Compute the commitment for this note
    pub fn commitment(&self) -> Commitment {
        CommitmentScheme::global().commit(self)
    }

    /// Attach the accumulator position the note's commitment was inserted at
    pub fn included(self, merkle_index: u64) -> IncludedNote {
        IncludedNote {
            note: self,
            merkle_index,
        }
    }
}

/// A note whose commitment sits at `merkle_index` in the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludedNote {
    pub note: Note,
    pub merkle_index: u64,
}

impl IncludedNote {
    pub fn with_nullifier(self, nullifier: Nullifier) -> IncludedNoteWithNullifier {
        IncludedNoteWithNullifier {
            note: self.note,
            merkle_index: self.merkle_index,
            nullifier,
        }
    }
}

/// An owned, included note together with the nullifier that spends it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludedNoteWithNullifier {
    pub note: Note,
    pub merkle_index: u64,
    pub nullifier: Nullifier,
}

impl IncludedNoteWithNullifier {
    pub fn value(&self) -> u64 {
        self.note.value.as_u64()
    }

    pub fn asset(&self) -> &Asset {
        &self.note.asset
    }
}

/// A commitment whose note is unknown to this wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludedCommitment {
    pub merkle_index: u64,
    pub commitment: Commitment,
}

/// One accumulator insertion as seen by the client: either a note it owns or
/// just the commitment of somebody else's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludedNoteOrCommitment {
    Note(IncludedNoteWithNullifier),
    Commitment(IncludedCommitment),
}

impl IncludedNoteOrCommitment {
    pub fn merkle_index(&self) -> u64 {
        match self {
            Self::Note(n) => n.merkle_index,
            Self::Commitment(c) => c.merkle_index,
        }
    }

    /// Leaf value for the accumulator
    pub fn commitment(&self) -> Commitment {
        match self {
            Self::Note(n) => n.note.commitment(),
            Self::Commitment(c) => c.commitment,
        }
    }

    pub fn as_note(&self) -> Option<&IncludedNoteWithNullifier> {
        match self {
            Self::Note(n) => Some(n),
            Self::Commitment(_) => None,
        }
    }
}

/// Encrypted note as published on chain. Opaque to this crate; only a
/// viewer holding the right key material can open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedNote {
    /// Ephemeral public key for ECDH
    pub ephemeral_pk: [u8; 32],
    /// Encrypted note data with authentication tag
    pub ciphertext: Vec<u8>,
}
