//! Key-value persistence.
//!
//! All state the core keeps goes through [`KvStore`]; the ledger, the tree
//! store and snapshots never talk to a storage engine directly.

pub mod db;
pub mod kv;
pub mod memory;
pub mod tree_store;

pub use db::RocksDbStore;
pub use kv::{KvBatch, KvExt, KvStore};
pub use memory::MemoryKvStore;
pub use tree_store::TreeStore;
