//! Per-request routing policy.

use reqwest::{Method, Url};

use crate::config::CacheConfig;
use crate::request::{Request, same_origin};

/// Why a request is left to the host untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    NotGet,
    CrossOrigin,
    QueryString,
    ApiPath,
    /// Intercepted, but neither cache nor network could answer.
    Unanswered,
}

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Passthrough(PassReason),
    /// Stored copy first, network on miss.
    CacheFirst,
    /// Network first, stored copy on failure.
    NetworkFirst,
}

/// Decides the route for every request of one worker version.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    origin: Url,
    tools_prefix: String,
}

impl RoutePolicy {
    #[must_use]
    pub fn new(origin: Url, config: &CacheConfig) -> Self {
        Self {
            origin,
            tools_prefix: config.tools_prefix.clone(),
        }
    }

    /// Routes a request. Depends only on method, origin, and URL, so the same
    /// path always gets the same strategy.
    #[must_use]
    pub fn classify(&self, request: &Request) -> Route {
        if request.method != Method::GET {
            return Route::Passthrough(PassReason::NotGet);
        }
        if !same_origin(&self.origin, &request.url) {
            return Route::Passthrough(PassReason::CrossOrigin);
        }
        if request.url.query().is_some() {
            return Route::Passthrough(PassReason::QueryString);
        }
        let path = request.url.path();
        if path.contains("api") {
            return Route::Passthrough(PassReason::ApiPath);
        }
        if path.starts_with(&self.tools_prefix) {
            Route::CacheFirst
        } else {
            Route::NetworkFirst
        }
    }
}
