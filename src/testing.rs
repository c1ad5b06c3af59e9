//! Test doubles shared across module tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Url;

use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::{Request, Response, ResponseType, same_origin};

pub const ORIGIN: &str = "https://tools.example";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

/// In-memory origin: path (with query) → response, 404 for anything else.
pub struct MockNetwork {
    origin: Url,
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            origin: origin(),
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page(self, path: &str, status: u16, body: &str) -> Self {
        self.set_page(path, Response::new(status, body.to_string()));
        self
    }

    pub fn set_page(&self, path: &str, response: Response) {
        self.routes.lock().unwrap().insert(path.to_string(), response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| *c == path).count()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let path = match request.url.query() {
            Some(q) => format!("{}?{q}", request.url.path()),
            None => request.url.path().to_string(),
        };
        self.calls.lock().unwrap().push(path.clone());

        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{} is unreachable", request.url),
            )));
        }

        let response = self
            .routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found"));

        let kind = if same_origin(&self.origin, &request.url) {
            response.kind
        } else {
            ResponseType::Opaque
        };
        Ok(response.with_kind(kind).with_url(request.url.as_str()))
    }
}
