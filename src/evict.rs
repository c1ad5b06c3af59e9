//! First-in-first-out bound on the dynamic partition.

use crate::cache::Partition;
use crate::error::Result;

/// Trims a partition back to a fixed number of entries, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evictor {
    max_entries: usize,
}

impl Evictor {
    #[must_use]
    pub const fn new(max_entries: usize) -> Self {
        Self { max_entries }
    }

    /// Deletes the oldest entries until at most `max_entries` remain.
    /// Returns how many entries were removed.
    ///
    /// Entries removed concurrently by another pass are not counted, so
    /// overlapping passes never delete more than the overshoot.
    pub async fn trim(&self, partition: &Partition) -> Result<usize> {
        let keys = partition.keys().await?;
        let excess = keys.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return Ok(0);
        }

        let mut removed = 0;
        for key in keys.iter().take(excess) {
            if partition.remove(key).await? {
                removed += 1;
            }
        }
        log::debug!(
            "Evicted {removed} entries from {} (max {})",
            partition.name(),
            self.max_entries
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheStorage, MemoryCacheStorage};
    use crate::request::{RequestKey, Response};

    fn key(i: usize) -> RequestKey {
        RequestKey {
            method: "GET".to_string(),
            url: format!("https://tools.example/page-{i}.html"),
        }
    }

    async fn filled(count: usize) -> Partition {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
        let partition = Partition::open(storage, "ombra-dynamic-v4").await.unwrap();
        for i in 0..count {
            partition.put(&key(i), &Response::new(200, "x")).await.unwrap();
        }
        partition
    }

    #[tokio::test]
    async fn under_limit_is_untouched() {
        let partition = filled(3).await;
        assert_eq!(Evictor::new(5).trim(&partition).await.unwrap(), 0);
        assert_eq!(partition.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn removes_oldest_first() {
        let partition = filled(7).await;
        assert_eq!(Evictor::new(4).trim(&partition).await.unwrap(), 3);
        assert_eq!(
            partition.keys().await.unwrap(),
            vec![key(3), key(4), key(5), key(6)]
        );
    }

    #[tokio::test]
    async fn zero_max_empties_partition() {
        let partition = filled(2).await;
        assert_eq!(Evictor::new(0).trim(&partition).await.unwrap(), 2);
        assert_eq!(partition.len().await.unwrap(), 0);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn trim_leaves_newest_max_entries(count in 0usize..40, max in 0usize..20) {
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let (removed, keys) = runtime.block_on(async {
                    let partition = filled(count).await;
                    let removed = Evictor::new(max).trim(&partition).await.unwrap();
                    (removed, partition.keys().await.unwrap())
                });

                prop_assert_eq!(removed, count.saturating_sub(max));
                prop_assert_eq!(keys.len(), count.min(max));
                let expected: Vec<_> = (count - keys.len()..count).map(key).collect();
                prop_assert_eq!(keys, expected);
            }
        }
    }
}
