use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch};

use crate::storage::{KvBatch, KvStore};

/// A thread-safe wrapper around RocksDB.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Opens the database at the specified path, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|e| anyhow::anyhow!("Failed to open RocksDB: {}", e))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Walk forward from `start` while `keep` accepts the key
    fn scan_from<F>(&self, start: &str, keep: F) -> Result<Vec<(String, Vec<u8>)>>
    where
        F: Fn(&str) -> bool,
    {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward));

        for item in iter {
            let (k, v) = item.context("RocksDB iteration failed")?;
            let key = String::from_utf8(k.to_vec()).context("non-utf8 key in store")?;
            if !keep(&key) {
                break;
            }
            out.push((key, v.to_vec()));
        }
        Ok(out)
    }
}

impl KvStore for RocksDbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    fn iter_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.scan_from(prefix, |k| k.starts_with(prefix))
    }

    fn iter_range(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        self.scan_from(start, |k| k < end)
    }

    fn apply(&self, batch: KvBatch) -> Result<()> {
        let mut wb = WriteBatch::default();
        for (key, value) in &batch.puts {
            wb.put(key.as_bytes(), value);
        }
        for key in &batch.removes {
            wb.delete(key.as_bytes());
        }
        self.db.write(wb).context("Failed to write batch")?;
        Ok(())
    }
}
