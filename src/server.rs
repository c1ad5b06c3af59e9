//! HTTP proxy that puts the active worker between browsers and the origin.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use reqwest::Url;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{Error, Result};
use crate::intercept::FetchOutcome;
use crate::network::Network;
use crate::registration::Registration;
use crate::request::{Destination, Request, Response, resolve, same_origin};
use crate::stats::StatsSnapshot;
use crate::worker::{Message, OfflineWorker, WorkerState};

/// Response header naming where the body came from.
pub const SOURCE_HEADER: &str = "x-ombra-source";

/// Upper bound on request bodies forwarded to the origin.
const MAX_FORWARD_BODY: usize = 16 * 1024 * 1024;

/// Headers recomputed by the server for every response.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

#[derive(Clone)]
struct AppState {
    registration: Arc<Registration>,
    network: Arc<dyn Network>,
    origin: Url,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct WorkerStatus {
    id: String,
    version: String,
    state: WorkerState,
    static_cache: String,
    dynamic_cache: String,
    stats: StatsSnapshot,
}

impl From<&OfflineWorker> for WorkerStatus {
    fn from(worker: &OfflineWorker) -> Self {
        Self {
            id: worker.id().to_string(),
            version: worker.version().to_string(),
            state: worker.state(),
            static_cache: worker.names().static_name.clone(),
            dynamic_cache: worker.names().dynamic_name.clone(),
            stats: worker.stats().snapshot(),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    origin: String,
    active: Option<WorkerStatus>,
    waiting: Option<WorkerStatus>,
    clients: usize,
}

async fn api_health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.registration.active().await;
    let waiting = state.registration.waiting().await;
    axum::Json(StatusResponse {
        origin: state.origin.to_string(),
        active: active.as_deref().map(WorkerStatus::from),
        waiting: waiting.as_deref().map(WorkerStatus::from),
        clients: state.registration.clients().len().await,
    })
}

async fn api_message(State(state): State<AppState>, body: String) -> axum::response::Response {
    let message = match Message::parse(&body) {
        Ok(message) => message,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match state.registration.post_message(message).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e @ Error::NoWaitingWorker) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        Err(e) => {
            log::error!("Message {message:?} failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Every non-admin request: intercept with the active worker, else forward.
async fn proxy(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();
    let request = match to_worker_request(&state.origin, &parts) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    if let Some(worker) = state.registration.active().await {
        match worker.handle_fetch(&request).await {
            FetchOutcome::Respond { response, source } => {
                return to_http_response(response, source.as_str());
            }
            FetchOutcome::Failed(e) => {
                log::warn!("{} {} failed: {e}", request.method, request.url);
                return (StatusCode::GATEWAY_TIMEOUT, e.to_string()).into_response();
            }
            FetchOutcome::Passthrough(_) => {}
        }
    }

    let body = match axum::body::to_bytes(body, MAX_FORWARD_BODY).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };
    match state.network.forward(&request, body).await {
        Ok(response) => to_http_response(response, "passthrough"),
        Err(e) => {
            log::warn!("Forwarding {} {} failed: {e}", request.method, request.url);
            (StatusCode::GATEWAY_TIMEOUT, e.to_string()).into_response()
        }
    }
}

fn to_worker_request(origin: &Url, parts: &Parts) -> Result<Request> {
    let path = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = resolve(origin, path)?;
    if !same_origin(origin, &url) {
        return Err(Error::InvalidUrl(format!("{path}: outside {origin}")));
    }

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(Request {
        method: parts.method.clone(),
        url,
        destination: destination(&parts.headers),
        headers,
    })
}

/// Uses `Sec-Fetch-Dest`, falling back to `Accept: text/html` for older clients.
fn destination(headers: &HeaderMap) -> Destination {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    match header("sec-fetch-dest") {
        Some(dest) => Destination::from_fetch_dest(dest),
        None if header("accept").is_some_and(|a| a.contains("text/html")) => Destination::Document,
        None => Destination::Empty,
    }
}

fn to_http_response(response: Response, source: &'static str) -> axum::response::Response {
    let mut builder = axum::http::Response::builder().status(response.status);
    for (name, value) in &response.headers {
        if SKIPPED_RESPONSE_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
        {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .header(SOURCE_HEADER, source)
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            log::warn!("Unusable response from {}: {e}", response.url);
            StatusCode::BAD_GATEWAY.into_response()
        })
}

/// Builds the proxy application: admin routes under `/_offline/` plus the
/// intercepting fallback.
pub fn router(registration: Arc<Registration>, network: Arc<dyn Network>, origin: Url) -> Router {
    let state = AppState {
        registration,
        network,
        origin,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/_offline/health", get(api_health))
        .route("/_offline/status", get(api_status))
        .route("/_offline/message", post(api_message))
        .fallback(proxy)
        .layer(cors)
        .with_state(state)
}

/// Binds `host:port` and serves `app` in the background.
///
/// Returns the bound address (useful with port 0).
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn run_server(host: &str, port: u16, app: Router) -> Result<SocketAddr> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Server(format!("{host}:{port}: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("Proxy server error: {e}");
        }
    });

    log::info!("Serving offline proxy on http://{local}");
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, MemoryCacheStorage};
    use crate::config::CacheConfig;
    use crate::testing::{MockNetwork, origin};

    struct Proxy {
        base: String,
        network: Arc<MockNetwork>,
        registration: Arc<Registration>,
        client: reqwest::Client,
    }

    async fn proxy_with_worker() -> Proxy {
        let network = Arc::new(
            MockNetwork::new()
                .with_page("/", 200, "home")
                .with_page("/index.html", 200, "home")
                .with_page("/tools/calculator.html", 200, "calc")
                .with_page("/search?q=x", 200, "results"),
        );
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
        let registration = Arc::new(Registration::new());
        let worker = OfflineWorker::new(
            CacheConfig::default().with_critical_assets(["/", "/index.html"]),
            origin(),
            storage,
            Arc::clone(&network) as Arc<dyn Network>,
        )
        .unwrap();
        registration.register(worker).await.unwrap();

        let app = router(
            Arc::clone(&registration),
            Arc::clone(&network) as Arc<dyn Network>,
            origin(),
        );
        let addr = run_server("127.0.0.1", 0, app).await.unwrap();
        Proxy {
            base: format!("http://{addr}"),
            network,
            registration,
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    impl Proxy {
        async fn get(&self, path: &str, dest: Option<&str>) -> reqwest::Response {
            let mut request = self.client.get(format!("{}{path}", self.base));
            if let Some(dest) = dest {
                request = request.header("sec-fetch-dest", dest);
            }
            request.send().await.unwrap()
        }

        async fn json(&self, path: &str) -> serde_json::Value {
            let text = self.get(path, None).await.text().await.unwrap();
            serde_json::from_str(&text).unwrap()
        }
    }

    fn source(response: &reqwest::Response) -> &str {
        response
            .headers()
            .get(SOURCE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn health_and_status() {
        let proxy = proxy_with_worker().await;

        let health = proxy.json("/_offline/health").await;
        assert_eq!(health["status"], "ok");

        let status = proxy.json("/_offline/status").await;
        assert_eq!(status["active"]["version"], "v4");
        assert_eq!(status["active"]["state"], "activated");
        assert_eq!(status["active"]["static_cache"], "ombra-static-v4");
        assert!(status["waiting"].is_null());
    }

    #[tokio::test]
    async fn tool_page_survives_going_offline() {
        let proxy = proxy_with_worker().await;

        let online = proxy.get("/tools/calculator.html", Some("document")).await;
        assert_eq!(source(&online), "network");
        assert_eq!(online.text().await.unwrap(), "calc");
        proxy.registration.active().await.unwrap().settle().await;

        proxy.network.set_online(false);
        let offline = proxy.get("/tools/calculator.html", Some("document")).await;
        assert_eq!(offline.status(), 200);
        assert_eq!(source(&offline), "cache");
        assert_eq!(offline.text().await.unwrap(), "calc");

        let unseen = proxy.get("/tools/unseen.html", Some("document")).await;
        assert_eq!(source(&unseen), "offline-fallback");
        assert_eq!(unseen.text().await.unwrap(), "home");
    }

    #[tokio::test]
    async fn passthrough_and_failures() {
        let proxy = proxy_with_worker().await;

        let search = proxy.get("/search?q=x", None).await;
        assert_eq!(source(&search), "passthrough");
        assert_eq!(search.text().await.unwrap(), "results");

        proxy.network.set_online(false);
        let script = proxy.get("/scripts/app.js", Some("script")).await;
        assert_eq!(script.status(), StatusCode::GATEWAY_TIMEOUT.as_u16());
    }

    #[tokio::test]
    async fn message_endpoint_statuses() {
        let proxy = proxy_with_worker().await;
        let url = format!("{}/_offline/message", proxy.base);

        let unknown = proxy
            .client
            .post(&url)
            .body(r#"{"type":"RELOAD"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 400);

        let nothing_waiting = proxy
            .client
            .post(&url)
            .body(r#"{"type":"SKIP_WAITING"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(nothing_waiting.status(), 404);
    }

    #[test]
    fn destination_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(destination(&headers), Destination::Empty);
        headers.insert("accept", "text/html,application/xhtml+xml".parse().unwrap());
        assert_eq!(destination(&headers), Destination::Document);
        headers.insert("sec-fetch-dest", "image".parse().unwrap());
        assert_eq!(destination(&headers), Destination::Image);
    }
}
