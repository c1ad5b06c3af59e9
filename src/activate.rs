//! Activation: stale partition cleanup and client takeover.

use futures::future::join_all;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::CacheNames;
use crate::worker::WorkerId;

/// Result of deleting stale partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: Vec<String>,
    /// Partitions that could not be deleted, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Result of one activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub purge: PurgeReport,
    /// Pages whose controller changed to the activated worker.
    pub claimed: usize,
}

/// Deletes every partition not owned by `current`.
///
/// Deletions run concurrently and independently; one failure does not stop
/// the others.
pub async fn purge_stale(storage: &dyn CacheStorage, current: &CacheNames) -> PurgeReport {
    let names = match storage.names().await {
        Ok(names) => names,
        Err(e) => {
            log::warn!("Could not list cache partitions: {e}");
            return PurgeReport {
                deleted: Vec::new(),
                failed: vec![("*".to_string(), e.to_string())],
            };
        }
    };
    let stale: Vec<String> = names.into_iter().filter(|n| !current.is_current(n)).collect();
    delete_all(storage, stale).await
}

/// Deletes every partition in the storage.
pub async fn purge_all(storage: &dyn CacheStorage) -> PurgeReport {
    match storage.names().await {
        Ok(names) => delete_all(storage, names).await,
        Err(e) => PurgeReport {
            deleted: Vec::new(),
            failed: vec![("*".to_string(), e.to_string())],
        },
    }
}

async fn delete_all(storage: &dyn CacheStorage, names: Vec<String>) -> PurgeReport {
    let results = join_all(names.into_iter().map(|name| async move {
        let result = storage.delete(&name).await;
        (name, result)
    }))
    .await;

    let mut report = PurgeReport::default();
    for (name, result) in results {
        match result {
            Ok(true) => {
                log::info!("Deleting old cache: {name}");
                report.deleted.push(name);
            }
            Ok(false) => log::debug!("Cache {name} was already gone"),
            Err(e) => {
                log::warn!("Failed to delete cache {name}: {e}");
                report.failed.push((name, e.to_string()));
            }
        }
    }
    report
}

/// Runs both activation steps concurrently and waits for both.
pub async fn activate(
    storage: &dyn CacheStorage,
    current: &CacheNames,
    clients: &Clients,
    worker: WorkerId,
) -> ActivationReport {
    let (purge, claimed) = futures::join!(purge_stale(storage, current), clients.claim(worker));
    ActivationReport { purge, claimed }
}
