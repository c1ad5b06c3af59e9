//! Fetch handling: cache-first and network-first strategies.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use crate::cache::{CacheStorage, Partition};
use crate::config::CacheNames;
use crate::error::{Error, Result};
use crate::evict::Evictor;
use crate::network::Network;
use crate::request::{Request, RequestKey, Response};
use crate::route::{PassReason, Route, RoutePolicy};
use crate::stats::CacheStats;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
    /// The cached offline document, served to a navigation nothing else could answer.
    OfflineFallback,
}

impl Source {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Network => "network",
            Self::OfflineFallback => "offline-fallback",
        }
    }
}

/// Result of handing one request to the interceptor.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; the host performs the request itself.
    Passthrough(PassReason),
    /// Answered by the worker.
    Respond { response: Response, source: Source },
    /// Handled, but neither network nor cache produced a response.
    Failed(Error),
}

impl FetchOutcome {
    /// The response, if the worker produced one.
    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        match self {
            Self::Respond { response, .. } => Some(response),
            _ => None,
        }
    }

    #[must_use]
    pub const fn source(&self) -> Option<Source> {
        match self {
            Self::Respond { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Applies the routing policy to requests and runs the chosen strategy.
///
/// Cache writes and evictions run on a [`TaskTracker`] so they never delay
/// the response; [`Interceptor::settle`] waits for them.
#[derive(Clone)]
pub struct Interceptor {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    stats: Arc<CacheStats>,
    names: CacheNames,
    policy: RoutePolicy,
    evictor: Evictor,
    fallback: Url,
    tasks: TaskTracker,
    // Held across close/wait/reopen of `tasks`.
    settling: Arc<Mutex<()>>,
}

impl Interceptor {
    #[must_use]
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        stats: Arc<CacheStats>,
        names: CacheNames,
        policy: RoutePolicy,
        evictor: Evictor,
        fallback: Url,
    ) -> Self {
        Self {
            storage,
            network,
            stats,
            names,
            policy,
            evictor,
            fallback,
            tasks: TaskTracker::new(),
            settling: Arc::new(Mutex::new(())),
        }
    }

    /// Routes `request` and answers it from the network, the cache, or the
    /// offline document.
    pub async fn handle(&self, request: &Request) -> FetchOutcome {
        let route = self.policy.classify(request);
        log::debug!("{} {} -> {route:?}", request.method, request.url);
        match route {
            Route::Passthrough(reason) => {
                self.stats.record_passthrough();
                FetchOutcome::Passthrough(reason)
            }
            Route::CacheFirst => self.cache_first(request).await,
            Route::NetworkFirst => self.network_first(request).await,
        }
    }

    async fn cache_first(&self, request: &Request) -> FetchOutcome {
        let key = request.key();
        if let Some(response) = self.lookup_current(&key).await {
            self.stats.record_hit();
            return FetchOutcome::Respond {
                response,
                source: Source::Cache,
            };
        }
        self.stats.record_miss();

        match self.fetch(request).await {
            Ok(response) => {
                self.store_in_background(key, &response);
                FetchOutcome::Respond {
                    response,
                    source: Source::Network,
                }
            }
            Err(e) => {
                // Another request may have stored it while this one was in flight.
                if let Some(response) = self.lookup_current(&key).await {
                    self.stats.record_hit();
                    return FetchOutcome::Respond {
                        response,
                        source: Source::Cache,
                    };
                }
                if let Some(outcome) = self.offline_fallback(request).await {
                    return outcome;
                }
                log::debug!("No cached copy of {key}: {e}");
                self.stats.record_passthrough();
                FetchOutcome::Passthrough(PassReason::Unanswered)
            }
        }
    }

    async fn network_first(&self, request: &Request) -> FetchOutcome {
        let key = request.key();
        match self.fetch(request).await {
            Ok(response) => {
                self.store_in_background(key, &response);
                FetchOutcome::Respond {
                    response,
                    source: Source::Network,
                }
            }
            Err(e) => {
                if let Some(response) = self.lookup_current(&key).await {
                    self.stats.record_hit();
                    return FetchOutcome::Respond {
                        response,
                        source: Source::Cache,
                    };
                }
                self.stats.record_miss();
                if let Some(outcome) = self.offline_fallback(request).await {
                    return outcome;
                }
                FetchOutcome::Failed(e)
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.stats.record_fetch();
        let result = self.network.fetch(request).await;
        if let Err(e) = &result {
            log::debug!("Network failed for {}: {e}", request.url);
            self.stats.record_network_failure();
        }
        result
    }

    /// Looks in this version's partitions, static first. Storage errors count as misses.
    async fn lookup_current(&self, key: &RequestKey) -> Option<Response> {
        for name in [&self.names.static_name, &self.names.dynamic_name] {
            match self.storage.lookup(name, key).await {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(e) => log::warn!("Cache lookup in {name} failed for {key}: {e}"),
            }
        }
        None
    }

    async fn offline_fallback(&self, request: &Request) -> Option<FetchOutcome> {
        if !request.is_navigation() {
            return None;
        }
        let response = self.lookup_current(&RequestKey::get(&self.fallback)).await?;
        self.stats.record_fallback();
        log::info!("Serving offline page for {}", request.url);
        Some(FetchOutcome::Respond {
            response,
            source: Source::OfflineFallback,
        })
    }

    /// Stores an eligible response in the dynamic partition, then trims it.
    ///
    /// Nothing is written once the partition has been deleted, so a worker
    /// that was replaced mid-request cannot recreate a purged partition.
    fn store_in_background(&self, key: RequestKey, response: &Response) {
        if !response.is_cacheable() {
            return;
        }
        let response = response.clone();
        let partition = Partition::new(Arc::clone(&self.storage), self.names.dynamic_name.clone());
        let stats = Arc::clone(&self.stats);
        let evictor = self.evictor;

        self.tasks.spawn(async move {
            match partition.put_if_open(&key, &response).await {
                Ok(true) => {}
                Ok(false) => {
                    log::debug!("{} was deleted; not caching {key}", partition.name());
                    return;
                }
                Err(e) => {
                    log::warn!("Failed to cache {key}: {e}");
                    return;
                }
            }
            stats.record_store();
            match evictor.trim(&partition).await {
                Ok(0) => {}
                Ok(removed) => stats.record_evictions(removed),
                Err(e) => log::warn!("Eviction in {} failed: {e}", partition.name()),
            }
        });
    }

    /// Waits until every background write started so far has finished.
    ///
    /// Concurrent callers take turns.
    pub async fn settle(&self) {
        let _turn = self.settling.lock().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Number of background writes still running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}
