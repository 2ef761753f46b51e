//! Shroud Privacy SDK
//!
//! Note model and commitment accumulator for the client side of a shielded pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Client-side state                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐ │
//! │  │    Notes     │  │ Commitments  │  │      Nullifiers       │ │
//! │  │ (owned, val) │  │ (tree leaves)│  │  (spent markers)      │ │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘ │
//! │         │                 │                     │               │
//! │         ▼                 ▼                     ▼               │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │        Pruned quaternary Merkle accumulator             │   │
//! │  │  • Staged (uncommitted) leaves                          │   │
//! │  │  • Membership proofs for retained leaves only           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod merkle;
pub mod note;
pub mod nullifier;

pub use commitment::{Commitment, CommitmentScheme};
pub use merkle::{
    ARITY, DEPTH, Hash, MAX_LEAVES, MerkleAccumulator, MerkleHasher, MerkleProof, PersistedTree,
    StagedLeaf, TreeError, TreeNode,
};
pub use note::{
    Asset, AssetKind, EncryptedNote, IncludedCommitment, IncludedNote, IncludedNoteOrCommitment,
    IncludedNoteWithNullifier, Note, NoteValue, StealthAddress,
};
pub use nullifier::Nullifier;
