//! In-process cache storage.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheStorage, validate_name};
use crate::error::Result;
use crate::request::{RequestKey, Response};

struct StoredEntry {
    key: RequestKey,
    response: Response,
}

struct MemoryPartition {
    name: String,
    entries: Vec<StoredEntry>,
}

/// Cache storage held entirely in memory. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryCacheStorage {
    partitions: RwLock<Vec<MemoryPartition>>,
}

impl MemoryCacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn find<'a>(partitions: &'a [MemoryPartition], name: &str) -> Option<&'a MemoryPartition> {
    partitions.iter().find(|p| p.name == name)
}

fn find_or_create<'a>(partitions: &'a mut Vec<MemoryPartition>, name: &str) -> &'a mut MemoryPartition {
    let index = match partitions.iter().position(|p| p.name == name) {
        Some(index) => index,
        None => {
            partitions.push(MemoryPartition {
                name: name.to_string(),
                entries: Vec::new(),
            });
            partitions.len() - 1
        }
    };
    &mut partitions[index]
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut partitions = self.partitions.write().await;
        find_or_create(&mut partitions, name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(find(&self.partitions.read().await, name).is_some())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut partitions = self.partitions.write().await;
        let before = partitions.len();
        partitions.retain(|p| p.name != name);
        Ok(partitions.len() != before)
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self
            .partitions
            .read()
            .await
            .iter()
            .map(|p| p.name.clone())
            .collect())
    }

    async fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
        validate_name(name)?;
        let mut partitions = self.partitions.write().await;
        let partition = find_or_create(&mut partitions, name);
        partition.entries.retain(|e| &e.key != key);
        partition.entries.push(StoredEntry {
            key: key.clone(),
            response: response.clone(),
        });
        Ok(())
    }

    async fn put_if_open(&self, name: &str, key: &RequestKey, response: &Response) -> Result<bool> {
        let mut partitions = self.partitions.write().await;
        let Some(partition) = partitions.iter_mut().find(|p| p.name == name) else {
            return Ok(false);
        };
        partition.entries.retain(|e| &e.key != key);
        partition.entries.push(StoredEntry {
            key: key.clone(),
            response: response.clone(),
        });
        Ok(true)
    }

    async fn lookup(&self, name: &str, key: &RequestKey) -> Result<Option<Response>> {
        let partitions = self.partitions.read().await;
        Ok(find(&partitions, name)
            .and_then(|p| p.entries.iter().find(|e| &e.key == key))
            .map(|e| e.response.clone()))
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        let partitions = self.partitions.read().await;
        Ok(find(&partitions, name)
            .map(|p| p.entries.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default())
    }

    async fn remove(&self, name: &str, key: &RequestKey) -> Result<bool> {
        let mut partitions = self.partitions.write().await;
        let Some(partition) = partitions.iter_mut().find(|p| p.name == name) else {
            return Ok(false);
        };
        let before = partition.entries.len();
        partition.entries.retain(|e| &e.key != key);
        Ok(partition.entries.len() != before)
    }
}
