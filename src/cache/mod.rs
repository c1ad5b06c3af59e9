//! Named, insertion-ordered cache partitions.
//!
//! A [`CacheStorage`] holds any number of partitions, each mapping a
//! [`RequestKey`] to a stored [`Response`]. Entries keep insertion order;
//! writing an existing key replaces it and moves it to the back, which is
//! what the FIFO evictor relies on.

mod disk;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::request::{RequestKey, Response};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Asynchronous key-value store of named partitions.
///
/// Implementations serialise conflicting writes to the same key; the last
/// write wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the partition if it does not exist yet.
    async fn open(&self, name: &str) -> Result<()>;

    /// Whether a partition with this name exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Deletes a partition and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Partition names in creation order.
    async fn names(&self) -> Result<Vec<String>>;

    /// Stores `response` under `key`, creating the partition if needed.
    async fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()>;

    /// Stores `response` under `key` only if the partition still exists.
    /// Returns whether it was stored.
    ///
    /// The existence check and the write happen atomically, so a write racing
    /// a [`delete`](Self::delete) never brings the partition back.
    async fn put_if_open(&self, name: &str, key: &RequestKey, response: &Response) -> Result<bool>;

    /// Looks up `key` in one partition. A missing partition is a miss.
    async fn lookup(&self, name: &str, key: &RequestKey) -> Result<Option<Response>>;

    /// Keys of one partition, oldest first.
    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>>;

    /// Removes one entry. Returns whether it existed.
    async fn remove(&self, name: &str, key: &RequestKey) -> Result<bool>;

    /// Number of entries in one partition.
    async fn len(&self, name: &str) -> Result<usize> {
        Ok(self.keys(name).await?.len())
    }
}

/// A handle to one named partition of a shared storage.
#[derive(Clone)]
pub struct Partition {
    storage: Arc<dyn CacheStorage>,
    name: String,
}

impl Partition {
    /// Wraps `name` in `storage` without touching the storage.
    #[must_use]
    pub fn new(storage: Arc<dyn CacheStorage>, name: impl Into<String>) -> Self {
        Self {
            storage,
            name: name.into(),
        }
    }

    /// Opens (create-if-absent) `name` in `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the storage cannot create it.
    pub async fn open(storage: Arc<dyn CacheStorage>, name: impl Into<String>) -> Result<Self> {
        let partition = Self::new(storage, name);
        partition.storage.open(&partition.name).await?;
        Ok(partition)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores an entry, creating the partition if it was deleted.
    pub async fn put(&self, key: &RequestKey, response: &Response) -> Result<()> {
        self.storage.put(&self.name, key, response).await
    }

    /// Stores an entry unless the partition has been deleted.
    pub async fn put_if_open(&self, key: &RequestKey, response: &Response) -> Result<bool> {
        self.storage.put_if_open(&self.name, key, response).await
    }

    /// A missing partition is a miss.
    pub async fn lookup(&self, key: &RequestKey) -> Result<Option<Response>> {
        self.storage.lookup(&self.name, key).await
    }

    /// Keys, oldest first.
    pub async fn keys(&self) -> Result<Vec<RequestKey>> {
        self.storage.keys(&self.name).await
    }

    /// Returns whether the entry existed.
    pub async fn remove(&self, key: &RequestKey) -> Result<bool> {
        self.storage.remove(&self.name, key).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.storage.len(&self.name).await
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition").field("name", &self.name).finish()
    }
}

/// Rejects names that are empty or could escape a storage directory.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPartitionName {
            name: name.to_string(),
        })
    }
}
