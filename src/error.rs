//! Error types for the ombra-offline library.

use thiserror::Error;

/// Errors that can occur while provisioning, serving, or managing caches.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure talking to the origin.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error in the disk-backed cache.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A partition index could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// A configuration could not be serialized.
    #[error("config encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A URL could not be parsed or resolved against the origin.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Partition names may only contain ASCII alphanumerics, `-`, `_` and `.`.
    #[error("invalid partition name: {name:?}")]
    InvalidPartitionName {
        /// The rejected name.
        name: String,
    },

    /// The origin answered, but not with a success status.
    #[error("HTTP {0}")]
    Status(u16),

    /// A lifecycle event arrived in a state that cannot handle it.
    #[error("worker {worker} is {actual}, expected {expected}")]
    InvalidState {
        /// Worker version tag.
        worker: String,
        /// State the operation requires.
        expected: &'static str,
        /// State the worker is actually in.
        actual: &'static str,
    },

    /// A message targeted the waiting worker but none is waiting.
    #[error("no worker is waiting to activate")]
    NoWaitingWorker,

    /// The proxy server failed to start.
    #[error("server error: {0}")]
    Server(String),
}

/// A specialized `Result` type for ombra-offline operations.
pub type Result<T> = std::result::Result<T, Error>;
