use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A set of writes applied atomically by [`KvStore::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvBatch {
    pub puts: Vec<(String, Vec<u8>)>,
    pub removes: Vec<String>,
}

impl KvBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.puts.push((key.into(), value));
    }

    pub fn put_json<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        self.puts.push((key.into(), serde_json::to_vec(value)?));
        Ok(())
    }

    pub fn remove(&mut self, key: impl Into<String>) {
        self.removes.push(key.into());
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.removes.is_empty()
    }
}

/// String-keyed byte store everything in the core persists through.
///
/// Iteration returns entries in ascending key order.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`
    fn iter_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// All entries with `start <= key < end`
    fn iter_range(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Apply every put and remove in one atomic step. Removes run after puts.
    fn apply(&self, batch: KvBatch) -> Result<()>;

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    fn put_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        self.apply(KvBatch {
            puts: entries,
            removes: Vec::new(),
        })
    }

    fn remove_many(&self, keys: Vec<String>) -> Result<()> {
        self.apply(KvBatch {
            puts: Vec::new(),
            removes: keys,
        })
    }
}

/// Typed accessors on top of any [`KvStore`]
pub trait KvExt: KvStore {
    fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)?
            .map(|bytes| {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .with_context(|| format!("invalid u64 length under {key}"))?;
                Ok(u64::from_be_bytes(arr))
            })
            .transpose()
    }

    fn put_u64(&self, key: &str, value: u64) -> Result<()> {
        self.put(key, &value.to_be_bytes())
    }

    fn get_u128(&self, key: &str) -> Result<Option<u128>> {
        self.get(key)?
            .map(|bytes| {
                let arr: [u8; 16] = bytes
                    .as_slice()
                    .try_into()
                    .with_context(|| format!("invalid u128 length under {key}"))?;
                Ok(u128::from_be_bytes(arr))
            })
            .transpose()
    }

    fn put_u128(&self, key: &str, value: u128) -> Result<()> {
        self.put(key, &value.to_be_bytes())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("failed to decode value under {key}"))
            })
            .transpose()
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put(key, &serde_json::to_vec(value)?)
    }
}

impl<S: KvStore + ?Sized> KvExt for S {}
