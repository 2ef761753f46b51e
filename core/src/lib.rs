//! Shroud Core
//!
//! Client-side state for a shielded pool: which notes the wallet owns, which
//! of them are spendable, and proofs that they sit in the commitment
//! accumulator, kept consistent while chain deltas stream in.
//!
//! ```text
//!  DeltaSource ──▶ decrypt ──▶ SyncEngine ──┬──▶ NoteLedger ──▶ gather_notes
//!                  (Viewer)                 │    (+ overlay)        │
//!                                           └──▶ MerkleAccumulator ─┴──▶ prepare_spend
//! ```

pub mod error;
pub mod ledger;
pub mod selector;
pub mod snapshot;
pub mod spend;
pub mod storage;
pub mod sync;
pub mod types;
pub mod viewer;

pub use error::{CoreError, Result};
pub use ledger::{LedgerDump, NoteLedger, OpDigest, OpMetadata, OpMetadataItem};
pub use selector::gather_notes;
pub use snapshot::{Snapshot, SnapshotStore};
pub use spend::{PreparedSpend, prepare_and_mark_spend, prepare_spend};
pub use storage::{KvStore, MemoryKvStore, RocksDbStore, TreeStore};
pub use sync::{DeltaSource, InMemoryDeltaSource, OptimisticSweeper, SyncEngine, SyncOpts};
pub use types::{GetNotesOpts, StateDiff, TotalEntityIndex};
pub use viewer::Viewer;

#[cfg(test)]
mod tests;
