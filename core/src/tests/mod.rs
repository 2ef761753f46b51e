mod snapshot;
mod sync;

use std::collections::HashSet;

use shroud_privacy::{
    Asset, EncryptedNote, IncludedCommitment, IncludedNote, IncludedNoteOrCommitment,
    IncludedNoteWithNullifier, Note, NoteValue, Nullifier, StealthAddress,
};

use crate::sync::{RawNoteEntry, RawStateDiff};
use crate::types::{StateDiff, TotalEntityIndex};
use crate::viewer::Viewer;

/// Viewer over a fixed address set.
///
/// "Encryption" is the note as JSON tagged with the recipient's `h1`; only
/// a viewer owning that address opens it.
pub(crate) struct MockViewer {
    owned: HashSet<StealthAddress>,
}

impl MockViewer {
    pub(crate) fn new(owned: &[StealthAddress]) -> Self {
        Self {
            owned: owned.iter().copied().collect(),
        }
    }
}

impl Viewer for MockViewer {
    fn is_own_address(&self, address: &StealthAddress) -> bool {
        self.owned.contains(address)
    }

    fn create_nullifier(&self, note: &IncludedNote) -> Nullifier {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"nf");
        hasher.update(&note.merkle_index.to_le_bytes());
        hasher.update(&note.note.nonce);
        Nullifier(hasher.finalize().into())
    }

    fn generate_new_nonce(&self, spent: &Nullifier) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"nonce");
        hasher.update(spent.as_bytes());
        hasher.finalize().into()
    }

    fn decrypt(&self, encrypted: &EncryptedNote) -> Option<Note> {
        if !self.owned.iter().any(|a| a.h1 == encrypted.ephemeral_pk) {
            return None;
        }
        serde_json::from_slice(&encrypted.ciphertext).ok()
    }
}

pub(crate) fn me() -> StealthAddress {
    StealthAddress {
        h1: [1u8; 32],
        h2: [2u8; 32],
    }
}

pub(crate) fn someone_else() -> StealthAddress {
    StealthAddress {
        h1: [9u8; 32],
        h2: [8u8; 32],
    }
}

pub(crate) fn viewer() -> MockViewer {
    MockViewer::new(&[me()])
}

pub(crate) fn token() -> Asset {
    Asset::erc20([0xaa; 20])
}

pub(crate) fn other_token() -> Asset {
    Asset::erc20([0xbb; 20])
}

pub(crate) fn tei(block: u64) -> TotalEntityIndex {
    TotalEntityIndex::from_parts(u32::try_from(block).unwrap(), 0, 0, 0)
}

pub(crate) fn note_for(owner: StealthAddress, asset: Asset, value: u64, seed: u64) -> Note {
    let mut nonce = [0u8; 32];
    nonce[..8].copy_from_slice(&seed.to_le_bytes());
    Note {
        owner,
        nonce,
        asset,
        value: NoteValue::new(value),
    }
}

/// Owned note of `asset` at `index`, nullifier derived by the mock viewer
pub(crate) fn owned_note(asset: Asset, value: u64, index: u64) -> IncludedNoteWithNullifier {
    let included = note_for(me(), asset, value, index).included(index);
    included.with_nullifier(viewer().create_nullifier(&included))
}

pub(crate) fn foreign_commitment(index: u64) -> IncludedNoteOrCommitment {
    let note = note_for(someone_else(), token(), 1, index);
    IncludedNoteOrCommitment::Commitment(IncludedCommitment {
        merkle_index: index,
        commitment: note.commitment(),
    })
}

/// Decrypted diff with owned notes at `notes` and committed up to `committed`
pub(crate) fn diff(
    block: u64,
    notes: Vec<IncludedNoteWithNullifier>,
    nullifiers: Vec<Nullifier>,
    committed: Option<u64>,
) -> StateDiff {
    StateDiff {
        notes_and_commitments: notes.into_iter().map(IncludedNoteOrCommitment::Note).collect(),
        nullifiers,
        latest_newly_synced_merkle_index: None,
        latest_committed_merkle_index: committed,
        latest_commit_tei: None,
        total_entity_index: tei(block),
    }
}

pub(crate) fn encrypt_for(note: &Note, merkle_index: u64) -> RawNoteEntry {
    RawNoteEntry::Encrypted {
        merkle_index,
        commitment: note.commitment(),
        ciphertext: EncryptedNote {
            ephemeral_pk: note.owner.h1,
            ciphertext: serde_json::to_vec(note).unwrap(),
        },
    }
}

pub(crate) fn raw_diff(block: u64, notes: Vec<RawNoteEntry>, committed: Option<u64>) -> RawStateDiff {
    RawStateDiff {
        notes,
        nullifiers: Vec::new(),
        latest_newly_synced_merkle_index: None,
        latest_committed_merkle_index: committed,
        latest_commit_tei: None,
        total_entity_index: tei(block),
        block_number: block,
    }
}
