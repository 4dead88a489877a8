//! Key-value store abstraction backing the token set, rate-limit windows and
//! the leaderboard list
//!
//! The single-process reference implementation keeps everything in memory.
//! The trait exists so a shared external store (Redis or similar) can be
//! swapped in for a multi-instance deployment without touching calling code.
//! Every mutation the pipeline relies on for correctness goes through
//! `compare_and_swap`, which is the store's only atomic read-modify-write
//! primitive.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors surfaced by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
    #[error("persistent write contention after {0} attempts")]
    Contention(u32),
    #[error("stored value is not decodable: {0}")]
    Corrupt(String),
}

/// A stored value together with the version token used for optimistic writes.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: u64,
}

/// Minimal key-value contract the submission pipeline needs.
///
/// `compare_and_swap` with `expected_version: None` means "write only if the
/// key does not exist yet" and is the single-success primitive behind token
/// consumption. With `Some(v)` it writes only if the key still carries
/// version `v`, which serializes read-merge-write cycles on the leaderboard.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Removes a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically writes `value` if the key's current version matches
    /// `expected_version`. Returns false (and writes nothing) on mismatch.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Vec<u8>,
    ) -> Result<bool, StoreError>;

    /// Lists keys starting with `prefix`. Used only by the periodic sweep.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-memory reference store.
///
/// Versions are allocated from one counter shared across keys; a key's
/// version changes on every successful write, so a stale reader always
/// fails its subsequent CAS.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (u64, Vec<u8>)>>,
    next_version: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_version: RwLock::new(1),
        }
    }

    pub fn shared() -> Arc<dyn KvStore> {
        Arc::new(Self::new())
    }

    async fn bump_version(&self) -> u64 {
        let mut counter = self.next_version.write().await;
        let version = *counter;
        *counter += 1;
        version
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|(version, value)| Versioned {
            value: value.clone(),
            version: *version,
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let version = self.bump_version().await;
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (version, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let version = self.bump_version().await;
        // The write lock spans the check and the write, so the pair is atomic.
        let mut entries = self.entries.write().await;
        let current = entries.get(key).map(|(v, _)| *v);

        if current != expected_version {
            return Ok(false);
        }

        entries.insert(key.to_string(), (version, value));
        Ok(true)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
