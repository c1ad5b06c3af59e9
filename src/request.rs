//! Request and response model shared by the cache, the network, and the interceptor.

use std::fmt;

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a response relates to the page that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response with readable body.
    Basic,
    /// Cross-origin response shared through CORS.
    Cors,
    /// Cross-origin response with hidden status and body.
    Opaque,
}

/// What kind of resource a request is loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
    /// A full page load (navigation).
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR and anything without a destination.
    #[default]
    Empty,
    Other,
}

impl Destination {
    /// Parses a `Sec-Fetch-Dest` header value.
    #[must_use]
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Self::Document,
            "script" | "worker" | "sharedworker" | "serviceworker" => Self::Script,
            "style" => Self::Style,
            "image" => Self::Image,
            "font" => Self::Font,
            "manifest" => Self::Manifest,
            "" | "empty" => Self::Empty,
            _ => Self::Other,
        }
    }
}

/// An outgoing request from a controlled page.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    /// Request headers forwarded to the origin.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// A plain `GET` for `url` with no destination.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            destination: Destination::Empty,
            headers: Vec::new(),
        }
    }

    /// A `GET` navigation (document load) for `url`.
    #[must_use]
    pub fn navigate(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            destination: Destination::Document,
            headers: Vec::new(),
        }
    }

    /// Resolves `path` against `origin` and builds a `GET` for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `path` does not resolve.
    pub fn get_path(origin: &Url, path: &str) -> Result<Self> {
        Ok(Self::get(resolve(origin, path)?))
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Whether this request loads a full document.
    #[must_use]
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    /// The identity this request is stored under.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Cache identity of a request: method plus full URL, query included, fragment dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    #[must_use]
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Key for a `GET` of `url`.
    #[must_use]
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A response as returned by the network or stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub kind: ResponseType,
    /// Final URL after redirects.
    pub url: String,
    /// Whether the request was redirected on the way.
    pub redirected: bool,
}

impl Response {
    /// A same-origin response with the given status and body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseType::Basic,
            url: String::new(),
            redirected: false,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ResponseType) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    /// Status in the 2xx range.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Only plain 200s from the same origin, reached without redirects, are stored.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseType::Basic && !self.redirected
    }

    /// First header value named `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Resolves a same-origin path (or absolute URL) against `origin`.
pub fn resolve(origin: &Url, path: &str) -> Result<Url> {
    origin
        .join(path)
        .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))
}

/// Parses an origin URL such as `https://tools.example`.
pub fn parse_origin(origin: &str) -> Result<Url> {
    let url = Url::parse(origin).map_err(|e| Error::InvalidUrl(format!("{origin}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::InvalidUrl(format!("{origin}: not an http(s) origin")));
    }
    Ok(url)
}

/// Whether two URLs share scheme, host, and port.
#[must_use]
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn key_is_query_sensitive_and_drops_fragment() {
        let a = RequestKey::get(&url("https://tools.example/a.html?x=1"));
        let b = RequestKey::get(&url("https://tools.example/a.html?x=2"));
        let c = RequestKey::get(&url("https://tools.example/a.html#top"));
        let d = RequestKey::get(&url("https://tools.example/a.html"));
        assert_ne!(a, b);
        assert_eq!(c, d);
        assert_eq!(d.to_string(), "GET https://tools.example/a.html");
    }

    #[test]
    fn key_includes_method() {
        let u = url("https://tools.example/form");
        assert_ne!(RequestKey::new(&Method::GET, &u), RequestKey::new(&Method::POST, &u));
    }

    #[test]
    fn cacheable_requires_plain_basic_200() {
        assert!(Response::new(200, "ok").is_cacheable());
        assert!(!Response::new(404, "missing").is_cacheable());
        assert!(!Response::new(204, "").is_cacheable());
        assert!(!Response::new(200, "x").with_kind(ResponseType::Opaque).is_cacheable());
        assert!(!Response::new(200, "x").with_kind(ResponseType::Cors).is_cacheable());
        assert!(!Response::new(200, "x").with_redirected(true).is_cacheable());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let r = Response::new(200, "").with_header("Content-Type", "text/html");
        assert_eq!(r.header("content-type"), Some("text/html"));
        assert_eq!(r.header("etag"), None);
    }

    #[test]
    fn fetch_dest_parsing() {
        assert_eq!(Destination::from_fetch_dest("document"), Destination::Document);
        assert_eq!(Destination::from_fetch_dest("Style"), Destination::Style);
        assert_eq!(Destination::from_fetch_dest(""), Destination::Empty);
        assert_eq!(Destination::from_fetch_dest("audio"), Destination::Other);
        assert!(Request::navigate(url("https://tools.example/")).is_navigation());
        assert!(!Request::get(url("https://tools.example/")).is_navigation());
    }

    #[test]
    fn origin_checks() {
        let origin = parse_origin("https://tools.example").unwrap();
        assert!(same_origin(&origin, &url("https://tools.example/tools/a.html")));
        assert!(!same_origin(&origin, &url("https://cdn.example/a.js")));
        assert!(!same_origin(&origin, &url("http://tools.example/")));
        assert!(parse_origin("ftp://tools.example").is_err());
        assert!(parse_origin("not a url").is_err());
    }

    #[test]
    fn resolve_paths_against_origin() {
        let origin = parse_origin("https://tools.example").unwrap();
        let r = Request::get_path(&origin, "/tools/calculator.html").unwrap();
        assert_eq!(r.url.as_str(), "https://tools.example/tools/calculator.html");
    }
}
