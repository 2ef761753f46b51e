use shroud_privacy::{Commitment, IncludedCommitment, IncludedNote, IncludedNoteOrCommitment};
use tracing::trace;

use crate::sync::source::{RawNoteEntry, RawStateDiff};
use crate::types::StateDiff;
use crate::viewer::Viewer;

/// Classify every entry of `raw` as an owned note or a bare commitment.
///
/// Anything that cannot be opened, is addressed to someone else, or opens
/// to a note not matching its published commitment is reduced to the
/// commitment; its contents never reach the ledger.
pub fn decrypt_state_diff<V: Viewer + ?Sized>(raw: RawStateDiff, viewer: &V) -> StateDiff {
    let mut entries: Vec<IncludedNoteOrCommitment> = raw
        .notes
        .into_iter()
        .map(|entry| classify(entry, viewer))
        .collect();
    entries.sort_by_key(|e| e.merkle_index());

    StateDiff {
        notes_and_commitments: entries,
        nullifiers: raw.nullifiers,
        latest_newly_synced_merkle_index: raw.latest_newly_synced_merkle_index,
        latest_committed_merkle_index: raw.latest_committed_merkle_index,
        latest_commit_tei: raw.latest_commit_tei,
        total_entity_index: raw.total_entity_index,
    }
}

fn classify<V: Viewer + ?Sized>(entry: RawNoteEntry, viewer: &V) -> IncludedNoteOrCommitment {
    match entry {
        RawNoteEntry::Plaintext(included) => {
            if viewer.is_own_address(&included.note.owner) {
                owned(included, viewer)
            } else {
                commitment_only(included.merkle_index, included.note.commitment())
            }
        }
        RawNoteEntry::Encrypted {
            merkle_index,
            commitment,
            ciphertext,
        } => match viewer.decrypt(&ciphertext) {
            Some(note) if viewer.is_own_address(&note.owner) && note.commitment() == commitment => {
                owned(note.included(merkle_index), viewer)
            }
            Some(_) => {
                trace!(merkle_index, "Decrypted note is not ours or does not match");
                commitment_only(merkle_index, commitment)
            }
            None => commitment_only(merkle_index, commitment),
        },
        RawNoteEntry::Commitment {
            merkle_index,
            commitment,
        } => commitment_only(merkle_index, commitment),
    }
}

fn owned<V: Viewer + ?Sized>(included: IncludedNote, viewer: &V) -> IncludedNoteOrCommitment {
    let nullifier = viewer.create_nullifier(&included);
    IncludedNoteOrCommitment::Note(included.with_nullifier(nullifier))
}

fn commitment_only(merkle_index: u64, commitment: Commitment) -> IncludedNoteOrCommitment {
    IncludedNoteOrCommitment::Commitment(IncludedCommitment {
        merkle_index,
        commitment,
    })
}
