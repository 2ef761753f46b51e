//! Error definitions for the client state core.
//!
//! Precondition violations from the accumulator surface as [`CoreError::Tree`]
//! and are never retried. [`CoreError::InsufficientFunds`] is the one
//! condition callers are expected to recover from.
use shroud_privacy::{Asset, Hash, TreeError};
use thiserror::Error;

use crate::types::TotalEntityIndex;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Accumulator precondition violated
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Key-value backend failure
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A state diff older than what the ledger has already applied
    #[error("State diff at TEI {incoming} is behind current TEI {current}")]
    NonMonotonicTei {
        current: TotalEntityIndex,
        incoming: TotalEntityIndex,
    },

    /// Spendable balance does not cover the requested amount
    #[error("Insufficient funds for {asset:?}: requested {requested}, owned {owned}")]
    InsufficientFunds {
        asset: Asset,
        requested: u128,
        owned: u128,
    },

    /// Proofs for one spend were taken against different roots
    #[error("Proof root mismatch: expected {}, found {}", hex::encode(expected), hex::encode(found))]
    ProofRootMismatch { expected: Hash, found: Hash },

    /// A record the ledger wrote earlier is gone
    #[error("Missing ledger record: {0}")]
    MissingRecord(String),

    /// The delta source failed while streaming
    #[error("Delta source error: {0:#}")]
    Source(anyhow::Error),
}

/// Result type for state core operations
pub type Result<T> = std::result::Result<T, CoreError>;
