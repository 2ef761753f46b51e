use shroud_privacy::{EncryptedNote, IncludedNote, Note, Nullifier, StealthAddress};

/// The wallet's view of its own identity.
///
/// Key material stays behind this trait: the core only asks ownership,
/// nullifier and decryption questions.
pub trait Viewer: Send + Sync {
    fn is_own_address(&self, address: &StealthAddress) -> bool;

    /// Nullifier that will be published when `note` is spent
    fn create_nullifier(&self, note: &IncludedNote) -> Nullifier;

    /// Fresh nonce for a change note derived from a spent nullifier
    fn generate_new_nonce(&self, spent: &Nullifier) -> [u8; 32];

    /// Open a note addressed to this wallet; `None` if it is not ours
    fn decrypt(&self, encrypted: &EncryptedNote) -> Option<Note>;
}
