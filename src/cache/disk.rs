//! Durable cache storage on the local file system.
//!
//! Layout under the root directory:
//!
//! ```text
//! partitions.json          partition names in creation order
//! <name>/index.json        entry metadata, oldest first
//! <name>/<sha256>.body     response bodies, named by hashed request identity
//! ```
//!
//! Every file is written to a `.tmp` sibling and renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{CacheStorage, validate_name};
use crate::error::Result;
use crate::request::{RequestKey, Response, ResponseType};

const PARTITIONS_FILE: &str = "partitions.json";
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    kind: ResponseType,
    url: String,
    redirected: bool,
    stored_at: DateTime<Utc>,
    body: String,
}

/// Cache storage persisted under a root directory.
pub struct DiskCacheStorage {
    root: PathBuf,
    // Serialises every read-modify-write of the index files.
    lock: Mutex<()>,
}

impl DiskCacheStorage {
    /// Opens (creating if needed) a storage rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn partition_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn read_names(&self) -> Result<Vec<String>> {
        read_json_or_default(&self.root.join(PARTITIONS_FILE)).await
    }

    async fn write_names(&self, names: &[String]) -> Result<()> {
        write_atomic(
            &self.root.join(PARTITIONS_FILE),
            &serde_json::to_vec_pretty(names)?,
        )
        .await
    }

    async fn read_index(&self, name: &str) -> Result<Vec<IndexEntry>> {
        read_json_or_default(&self.partition_dir(name).join(INDEX_FILE)).await
    }

    async fn write_index(&self, name: &str, index: &[IndexEntry]) -> Result<()> {
        write_atomic(
            &self.partition_dir(name).join(INDEX_FILE),
            &serde_json::to_vec_pretty(index)?,
        )
        .await
    }

    /// Registers the partition if missing. Caller holds the lock.
    async fn ensure_partition(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut names = self.read_names().await?;
        tokio::fs::create_dir_all(self.partition_dir(name)).await?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            self.write_names(&names).await?;
            log::debug!("Created cache partition {name}");
        }
        Ok(())
    }

    /// Writes the body file, then the index. Caller holds the lock.
    async fn write_entry(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
        let body = body_file_name(key);
        write_atomic(&self.partition_dir(name).join(&body), &response.body).await?;

        let mut index = self.read_index(name).await?;
        index.retain(|e| &e.key != key);
        index.push(IndexEntry {
            key: key.clone(),
            status: response.status,
            headers: response.headers.clone(),
            kind: response.kind,
            url: response.url.clone(),
            redirected: response.redirected,
            stored_at: Utc::now(),
            body,
        });
        self.write_index(name, &index).await
    }

    async fn is_registered(&self, name: &str) -> Result<bool> {
        Ok(self.read_names().await?.iter().any(|n| n == name))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_partition(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        self.is_registered(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut names = self.read_names().await?;
        let before = names.len();
        names.retain(|n| n != name);
        if names.len() == before {
            return Ok(false);
        }
        self.write_names(&names).await?;
        if validate_name(name).is_ok() {
            match tokio::fs::remove_dir_all(self.partition_dir(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    async fn names(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.read_names().await
    }

    async fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_partition(name).await?;
        self.write_entry(name, key, response).await
    }

    async fn put_if_open(&self, name: &str, key: &RequestKey, response: &Response) -> Result<bool> {
        let _guard = self.lock.lock().await;
        if !self.is_registered(name).await? {
            return Ok(false);
        }
        self.write_entry(name, key, response).await?;
        Ok(true)
    }

    async fn lookup(&self, name: &str, key: &RequestKey) -> Result<Option<Response>> {
        let _guard = self.lock.lock().await;
        if !self.is_registered(name).await? {
            return Ok(None);
        }
        let index = self.read_index(name).await?;
        let Some(entry) = index.into_iter().find(|e| &e.key == key) else {
            return Ok(None);
        };
        let body = match tokio::fs::read(self.partition_dir(name).join(&entry.body)).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Cache entry {key} in {name} has no body file; treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Response {
            status: entry.status,
            headers: entry.headers,
            body: body.into(),
            kind: entry.kind,
            url: entry.url,
            redirected: entry.redirected,
        }))
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        let _guard = self.lock.lock().await;
        if !self.is_registered(name).await? {
            return Ok(Vec::new());
        }
        Ok(self
            .read_index(name)
            .await?
            .into_iter()
            .map(|e| e.key)
            .collect())
    }

    async fn remove(&self, name: &str, key: &RequestKey) -> Result<bool> {
        let _guard = self.lock.lock().await;
        if !self.is_registered(name).await? {
            return Ok(false);
        }
        let mut index = self.read_index(name).await?;
        let Some(position) = index.iter().position(|e| &e.key == key) else {
            return Ok(false);
        };
        let entry = index.remove(position);
        self.write_index(name, &index).await?;
        if let Err(e) = tokio::fs::remove_file(self.partition_dir(name).join(&entry.body)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove body file {} of {key} in {name}: {e}", entry.body);
            }
        }
        Ok(true)
    }
}

fn body_file_name(key: &RequestKey) -> String {
    let digest = Sha256::digest(key.to_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{hex}.body")
}

async fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
