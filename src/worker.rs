//! One versioned offline worker and its lifecycle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::activate::{self, ActivationReport};
use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::{CacheConfig, CacheNames};
use crate::error::{Error, Result};
use crate::evict::Evictor;
use crate::intercept::{FetchOutcome, Interceptor};
use crate::network::Network;
use crate::provision::{ProvisionReport, Provisioner};
use crate::request::{Request, resolve};
use crate::route::RoutePolicy;
use crate::stats::CacheStats;

/// Identifies one worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", &self.0.simple().to_string()[..8])
    }
}

/// Lifecycle position of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages a page can post to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Activate without waiting for the old version's pages to close.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

impl Message {
    /// Parses a JSON message such as `{"type":"SKIP_WAITING"}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON or an unknown message type.
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A versioned worker: owns its partitions and answers fetches once active.
pub struct OfflineWorker {
    id: WorkerId,
    config: CacheConfig,
    names: CacheNames,
    origin: Url,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    stats: Arc<CacheStats>,
    interceptor: Interceptor,
    state: watch::Sender<WorkerState>,
    skip_waiting: AtomicBool,
}

impl OfflineWorker {
    /// Creates a worker in the `installing` state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the offline document does not resolve
    /// against `origin`.
    pub fn new(
        config: CacheConfig,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self> {
        let names = config.cache_names();
        let stats = Arc::new(CacheStats::new());
        let fallback = resolve(&origin, &config.offline_fallback)?;
        let interceptor = Interceptor::new(
            Arc::clone(&storage),
            Arc::clone(&network),
            Arc::clone(&stats),
            names.clone(),
            RoutePolicy::new(origin.clone(), &config),
            Evictor::new(config.max_dynamic_entries),
            fallback,
        );
        let (state, _) = watch::channel(WorkerState::Installing);

        Ok(Self {
            id: WorkerId::new(),
            config,
            names,
            origin,
            storage,
            network,
            stats,
            interceptor,
            state,
            skip_waiting: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.config.version
    }

    #[must_use]
    pub const fn names(&self) -> &CacheNames {
        &self.names
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("{} ({}): {previous} -> {state}", self.id, self.config.version);
        }
    }

    fn expect_state(&self, expected: WorkerState) -> Result<()> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                worker: self.config.version.clone(),
                expected: expected.as_str(),
                actual: actual.as_str(),
            })
        }
    }

    /// Populates the static partition with the critical assets and opens the
    /// dynamic partition.
    ///
    /// Unreachable assets do not fail the install.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the worker is installing, or the
    /// storage error that prevented a partition from opening. A storage
    /// failure leaves the worker redundant.
    pub async fn install(&self) -> Result<ProvisionReport> {
        self.expect_state(WorkerState::Installing)?;
        log::info!("Installing {} ({})", self.id, self.config.version);

        let provisioner = Provisioner::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.network),
            Arc::clone(&self.stats),
            self.origin.clone(),
            self.config.install_concurrency,
        );
        let installed: Result<ProvisionReport> = async {
            let report = provisioner
                .provision(&self.names.static_name, &self.config.critical_assets)
                .await?;
            self.storage.open(&self.names.dynamic_name).await?;
            Ok(report)
        }
        .await;
        match installed {
            Ok(report) => {
                self.set_state(WorkerState::Installed);
                if self.config.eager_activation {
                    self.skip_waiting();
                }
                Ok(report)
            }
            Err(e) => {
                log::error!("Install of {} failed: {e}", self.config.version);
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Deletes stale partitions and takes control of every open page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the worker is installed. Failed
    /// deletions are reported, not returned.
    pub async fn activate(&self, clients: &Clients) -> Result<ActivationReport> {
        self.expect_state(WorkerState::Installed)?;
        self.set_state(WorkerState::Activating);
        log::info!("Activating {} ({})", self.id, self.config.version);

        let report = activate::activate(self.storage.as_ref(), &self.names, clients, self.id).await;
        self.set_state(WorkerState::Activated);
        Ok(report)
    }

    /// Answers a request from a page this worker controls.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        self.interceptor.handle(request).await
    }

    /// Handles a message posted by a page.
    pub fn handle_message(&self, message: Message) {
        match message {
            Message::SkipWaiting => {
                log::info!("Skip waiting requested for {}", self.config.version);
                self.skip_waiting();
            }
        }
    }

    /// Requests activation without waiting for pages of the old version to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Waits for background cache writes to finish.
    pub async fn settle(&self) {
        self.interceptor.settle().await;
    }

    pub(crate) fn make_redundant(&self) {
        self.set_state(WorkerState::Redundant);
    }
}

impl fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
