//! Install-time population of the static partition.

use std::sync::Arc;

use futures::{StreamExt, stream};
use reqwest::Url;

use crate::cache::{CacheStorage, Partition};
use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::Request;
use crate::stats::CacheStats;

/// Outcome of one install pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Asset paths stored in the static partition, in list order.
    pub cached: Vec<String>,
    /// Asset paths that could not be stored, with the reason.
    pub failed: Vec<(String, String)>,
}

impl ProvisionReport {
    /// Whether every critical asset was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches the critical asset list into the static partition.
pub struct Provisioner {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    stats: Arc<CacheStats>,
    origin: Url,
    concurrency: usize,
}

impl Provisioner {
    #[must_use]
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        stats: Arc<CacheStats>,
        origin: Url,
        concurrency: usize,
    ) -> Self {
        Self {
            storage,
            network,
            stats,
            origin,
            concurrency: concurrency.max(1),
        }
    }

    /// Opens `partition_name` and stores every asset that can be fetched.
    ///
    /// Individual asset failures are logged and reported, never returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the partition cannot be opened.
    pub async fn provision(&self, partition_name: &str, assets: &[String]) -> Result<ProvisionReport> {
        let partition = Partition::open(Arc::clone(&self.storage), partition_name).await?;
        log::info!(
            "Caching {} static files into {partition_name} for offline use",
            assets.len()
        );

        let partition = &partition;
        let mut results: Vec<(usize, String, Result<()>)> =
            stream::iter(assets.iter().cloned().enumerate())
                .map(|(index, path)| async move {
                    let result = self.provision_one(partition, &path).await;
                    (index, path, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut report = ProvisionReport::default();
        for (_, path, result) in results {
            match result {
                Ok(()) => {
                    self.stats.record_provisioned();
                    report.cached.push(path);
                }
                Err(e) => {
                    log::warn!("Failed to cache {path}: {e}");
                    self.stats.record_provision_failure();
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        if report.is_complete() {
            log::info!("Cached all {} static files", report.cached.len());
        } else {
            log::warn!(
                "Some files failed to cache: {} of {} stored",
                report.cached.len(),
                assets.len()
            );
        }
        Ok(report)
    }

    async fn provision_one(&self, partition: &Partition, path: &str) -> Result<()> {
        let request = Request::get_path(&self.origin, path)?;
        let response = self.network.fetch(&request).await?;
        if !response.is_ok() {
            return Err(Error::Status(response.status));
        }
        partition.put(&request.key(), &response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::request::RequestKey;
    use crate::testing::{MockNetwork, origin, url};

    fn provisioner(network: MockNetwork) -> (Provisioner, Arc<dyn CacheStorage>, Arc<CacheStats>) {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
        let stats = Arc::new(CacheStats::new());
        let provisioner = Provisioner::new(
            Arc::clone(&storage),
            Arc::new(network),
            Arc::clone(&stats),
            origin(),
            2,
        );
        (provisioner, storage, stats)
    }

    fn assets(paths: &[&str]) -> Vec<String> {
        paths.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn stores_every_reachable_asset() {
        let network = MockNetwork::new()
            .with_page("/", 200, "home")
            .with_page("/index.html", 200, "home")
            .with_page("/style.css", 200, "body{}");
        let (provisioner, storage, stats) = provisioner(network);

        let report = provisioner
            .provision("ombra-static-v4", &assets(&["/", "/index.html", "/style.css"]))
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.cached, vec!["/", "/index.html", "/style.css"]);
        for path in ["/", "/index.html", "/style.css"] {
            let hit = storage
                .lookup("ombra-static-v4", &RequestKey::get(&url(path)))
                .await
                .unwrap();
            assert!(hit.is_some(), "{path} missing");
        }
        assert_eq!(stats.snapshot().assets_provisioned, 3);
    }

    #[tokio::test]
    async fn a_404_does_not_abort_install() {
        let network = MockNetwork::new()
            .with_page("/", 200, "home")
            .with_page("/index.html", 200, "home")
            .with_page("/style.css", 404, "missing");
        let (provisioner, storage, stats) = provisioner(network);

        let report = provisioner
            .provision("ombra-static-v4", &assets(&["/", "/index.html", "/style.css"]))
            .await
            .unwrap();

        assert_eq!(report.cached, vec!["/", "/index.html"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0],
            ("/style.css".to_string(), "HTTP 404".to_string())
        );
        assert!(
            storage
                .lookup("ombra-static-v4", &RequestKey::get(&url("/index.html")))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            storage
                .lookup("ombra-static-v4", &RequestKey::get(&url("/style.css")))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(stats.snapshot().provision_failures, 1);
    }

    #[tokio::test]
    async fn offline_install_completes_empty() {
        let network = MockNetwork::new().with_page("/", 200, "home");
        network.set_online(false);
        let (provisioner, storage, _) = provisioner(network);

        let report = provisioner
            .provision("ombra-static-v4", &assets(&["/", "/index.html"]))
            .await
            .unwrap();

        assert!(report.cached.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert!(storage.has("ombra-static-v4").await.unwrap());
    }

    #[tokio::test]
    async fn bad_partition_name_fails_install() {
        let (provisioner, _, _) = provisioner(MockNetwork::new());
        assert!(provisioner.provision("../bad", &assets(&["/"])).await.is_err());
    }
}
