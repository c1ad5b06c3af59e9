//! Network access to the site origin.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;

use crate::error::Result;
use crate::request::{Request, Response, ResponseType, same_origin};

/// Fetches requests from the network.
///
/// `Err` means the request never produced a response (DNS, connect,
/// timeout, TLS). HTTP error statuses are `Ok` responses.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;

    /// Sends a request the worker does not handle, body included.
    async fn forward(&self, request: &Request, _body: Bytes) -> Result<Response> {
        self.fetch(request).await
    }
}

/// Builds the HTTP client used for origin requests.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Hop-by-hop and routing headers that are never forwarded upstream.
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "content-length",
];

/// reqwest-backed network bound to one origin.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: Url,
}

impl HttpNetwork {
    #[must_use]
    pub fn new(client: reqwest::Client, origin: Url) -> Self {
        Self { client, origin }
    }

    /// Creates a network with a default client and the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`](crate::Error::Network) if the TLS backend cannot be initialised.
    pub fn with_timeout(origin: Url, timeout: Duration) -> Result<Self> {
        Ok(Self::new(build_http_client(timeout)?, origin))
    }

    /// Classifies a network response the way a page would see it.
    fn response_type(&self, final_url: &Url) -> ResponseType {
        if same_origin(&self.origin, final_url) {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }

    async fn send(&self, request: &Request, body: Option<Bytes>) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            if SKIPPED_REQUEST_HEADERS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name))
            {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        let mut requested = request.url.clone();
        requested.set_fragment(None);

        Ok(Response {
            status,
            headers,
            body,
            kind: self.response_type(&final_url),
            redirected: final_url != requested,
            url: final_url.into(),
        })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.send(request, None).await
    }

    async fn forward(&self, request: &Request, body: Bytes) -> Result<Response> {
        self.send(request, Some(body)).await
    }
}
