//! Delta source contract and the cancellable diff stream.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shroud_privacy::{Commitment, EncryptedNote, IncludedNote, Nullifier};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::TotalEntityIndex;

/// One accumulator insertion as delivered by the chain indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawNoteEntry {
    /// Note published in the clear (e.g. a deposit)
    Plaintext(IncludedNote),
    Encrypted {
        merkle_index: u64,
        commitment: Commitment,
        ciphertext: EncryptedNote,
    },
    Commitment {
        merkle_index: u64,
        commitment: Commitment,
    },
}

impl RawNoteEntry {
    pub fn merkle_index(&self) -> u64 {
        match self {
            Self::Plaintext(n) => n.merkle_index,
            Self::Encrypted { merkle_index, .. } | Self::Commitment { merkle_index, .. } => {
                *merkle_index
            }
        }
    }
}

/// Chain progress before decryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStateDiff {
    pub notes: Vec<RawNoteEntry>,
    pub nullifiers: Vec<Nullifier>,
    pub latest_newly_synced_merkle_index: Option<u64>,
    pub latest_committed_merkle_index: Option<u64>,
    pub latest_commit_tei: Option<TotalEntityIndex>,
    pub total_entity_index: TotalEntityIndex,
    pub block_number: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterStateDiffsOpts {
    /// Last TEI to deliver, inclusive
    pub to_tei: Option<TotalEntityIndex>,
    /// Blocks behind the indexed head that are held back
    pub finality_blocks: u64,
}

/// Source of ordered state diffs (an indexer, a subgraph, a replay log).
///
/// Diffs come out strictly increasing in TEI, each sorted by merkle index.
/// Retrying failed fetches is the source's business.
pub trait DeltaSource: Send + Sync {
    fn latest_indexed_block(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn iter_state_diffs(&self, from: TotalEntityIndex, opts: IterStateDiffsOpts)
    -> StateDiffStream;
}

/// Create a connected producer/consumer pair
pub fn channel(buffer: usize) -> (StateDiffSender, StateDiffStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    (
        StateDiffSender {
            tx,
            cancel: cancel.clone(),
        },
        StateDiffStream { rx, cancel },
    )
}

/// Consumer half: pulls one diff at a time
pub struct StateDiffStream {
    rx: mpsc::Receiver<anyhow::Result<RawStateDiff>>,
    cancel: CancellationToken,
}

impl StateDiffStream {
    /// Next diff, or `None` once the producer is done or the stream was
    /// closed
    pub async fn next(&mut self) -> Option<anyhow::Result<RawStateDiff>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Stop the producer; buffered diffs are discarded
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for StateDiffStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Producer half, owned by the task feeding the stream
pub struct StateDiffSender {
    tx: mpsc::Sender<anyhow::Result<RawStateDiff>>,
    cancel: CancellationToken,
}

impl StateDiffSender {
    /// Wait for buffer space and send. `false` means the consumer is gone and
    /// the producer should stop.
    pub async fn send(&self, item: anyhow::Result<RawStateDiff>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = self.tx.send(item) => res.is_ok(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Delta source over a fixed list of diffs
pub struct InMemoryDeltaSource {
    diffs: Arc<Vec<RawStateDiff>>,
    latest_block: u64,
    buffer: usize,
}

impl InMemoryDeltaSource {
    pub fn new(mut diffs: Vec<RawStateDiff>, latest_block: u64) -> Self {
        diffs.sort_by_key(|d| d.total_entity_index);
        Self {
            diffs: Arc::new(diffs),
            latest_block,
            buffer: 1,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

impl DeltaSource for InMemoryDeltaSource {
    async fn latest_indexed_block(&self) -> anyhow::Result<u64> {
        Ok(self.latest_block)
    }

    fn iter_state_diffs(
        &self,
        from: TotalEntityIndex,
        opts: IterStateDiffsOpts,
    ) -> StateDiffStream {
        let (tx, stream) = channel(self.buffer);
        let diffs = Arc::clone(&self.diffs);
        let final_block = self.latest_block.saturating_sub(opts.finality_blocks);

        tokio::spawn(async move {
            let mut sent = 0usize;
            for diff in diffs.iter().filter(|d| d.total_entity_index >= from) {
                if opts.to_tei.is_some_and(|to| diff.total_entity_index > to) {
                    break;
                }
                if diff.block_number > final_block {
                    break;
                }
                if !tx.send(Ok(diff.clone())).await {
                    debug!(sent, "Diff stream closed by consumer");
                    return;
                }
                sent += 1;
            }
            debug!(sent, from = %from, "Diff stream exhausted");
        });

        stream
    }
}
