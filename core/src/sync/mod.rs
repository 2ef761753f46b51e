//! Chain synchronisation: delta sources, trial decryption, the engine that
//! folds diffs into ledger and tree, and the optimistic overlay sweeper.

pub mod decrypt;
pub mod engine;
pub mod source;
pub mod sweeper;

pub use decrypt::decrypt_state_diff;
pub use engine::{SyncEngine, SyncOpts, SyncReport};
pub use source::{
    DeltaSource, InMemoryDeltaSource, IterStateDiffsOpts, RawNoteEntry, RawStateDiff,
    StateDiffSender, StateDiffStream, channel,
};
pub use sweeper::{OptimisticSweeper, unix_time_ms};
