//! ombra-offline - offline caching for a static tools site.
//!
//! A versioned [`OfflineWorker`] precaches the site's critical assets into a
//! static partition, answers requests cache-first under `/tools/` and
//! network-first elsewhere, keeps visited pages in a bounded dynamic
//! partition, and falls back to the cached homepage for navigations that
//! cannot be answered offline. A [`Registration`] moves worker versions
//! through install, waiting and activation; an [`UpdateNotifier`] offers a
//! waiting version to the page and reloads it once the version takes over.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ombra_offline::{
//!     CacheConfig, DiskCacheStorage, HttpNetwork, OfflineWorker, Registration, Request,
//!     parse_origin,
//! };
//!
//! # async fn example() -> ombra_offline::Result<()> {
//! let origin = parse_origin("https://tools.example")?;
//! let storage = Arc::new(DiskCacheStorage::new("/var/cache/ombra").await?);
//! let network = Arc::new(HttpNetwork::with_timeout(origin.clone(), Duration::from_secs(15))?);
//!
//! let registration = Registration::new();
//! let worker = OfflineWorker::new(CacheConfig::default(), origin.clone(), storage, network)?;
//! let outcome = registration.register(worker).await?;
//! println!("Cached {} static files", outcome.provision.cached.len());
//!
//! if let Some(worker) = registration.active().await {
//!     let page = Request::navigate(origin.join("/tools/calculator.html").expect("valid path"));
//!     let outcome = worker.handle_fetch(&page).await;
//!     println!("{:?}", outcome.source());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod activate;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod evict;
pub mod intercept;
pub mod network;
pub mod notifier;
pub mod provision;
pub mod registration;
pub mod request;
pub mod route;
pub mod stats;
pub mod worker;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "server")]
pub mod server;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use activate::{ActivationReport, PurgeReport};
pub use cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage, Partition};
pub use clients::{ClientEvent, ClientHandle, ClientId, Clients};
pub use config::{AppConfig, CacheConfig, CacheNames, PathConfig, ServerConfig};
pub use error::{Error, Result};
pub use evict::Evictor;
pub use intercept::{FetchOutcome, Interceptor, Source};
pub use network::{HttpNetwork, Network};
pub use notifier::{NoHooks, NotifierHooks, UpdateNotifier};
pub use provision::{ProvisionReport, Provisioner};
pub use registration::{RegisterOutcome, Registration, RegistrationEvent};
pub use request::{Destination, Request, RequestKey, Response, ResponseType, parse_origin};
pub use route::{PassReason, Route, RoutePolicy};
pub use stats::{CacheStats, StatsSnapshot};
pub use worker::{Message, OfflineWorker, WorkerId, WorkerState};
