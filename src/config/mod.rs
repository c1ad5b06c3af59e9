//! Configuration for the cache manager, the proxy server, and storage paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Paths cached eagerly at install time.
pub const DEFAULT_CRITICAL_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/assets/styles/base.css",
    "/assets/scripts/effects.js",
    "/favicon.svg",
    "/favicon.ico",
    "/apple-touch-icon.png",
    "/tools/image-converter.html",
    "/tools/image-resizer.html",
    "/tools/pdf-to-text.html",
    "/tools/text-to-pdf.html",
    "/tools/pdf-merge.html",
    "/tools/image-to-pdf.html",
    "/tools/heic-to-jpg.html",
    "/tools/file-compressor.html",
    "/tools/color-converter.html",
    "/tools/calculator.html",
    "/tools/currency-converter.html",
    "/tools/ip-calculator.html",
    "/tools/ip-info.html",
    "/tools/whois-lookup.html",
    "/tools/dns-propagation.html",
    "/tools/dns-lookup.html",
    "/tools/unix-time.html",
    "/tools/uuid-generator.html",
    "/tools/text-diff.html",
    "/tools/json-to-csv.html",
    "/tools/text-statistics.html",
    "/tools/lorem-ipsum.html",
    "/tools/number-converter.html",
    "/tools/password-generator.html",
    "/tools/hash-generator.html",
];

/// Cache policy for one deployed worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix shared by every partition name.
    pub prefix: String,
    /// Version tag embedded in partition names. Bump it to invalidate caches.
    pub version: String,
    /// Upper bound on entries in the dynamic partition.
    pub max_dynamic_entries: usize,
    /// Requests under this path prefix are served cache-first.
    pub tools_prefix: String,
    /// Document served to offline navigations that have no cache entry.
    pub offline_fallback: String,
    /// Activate right after install instead of waiting for old clients to go away.
    pub eager_activation: bool,
    /// Number of critical assets fetched concurrently during install.
    pub install_concurrency: usize,
    /// Same-origin paths that must be in the static partition after install.
    pub critical_assets: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "ombra".to_string(),
            version: "v4".to_string(),
            max_dynamic_entries: 50,
            tools_prefix: "/tools/".to_string(),
            offline_fallback: "/index.html".to_string(),
            eager_activation: false,
            install_concurrency: 4,
            critical_assets: DEFAULT_CRITICAL_ASSETS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the partition name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the version tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the dynamic partition bound.
    #[must_use]
    pub const fn with_max_dynamic_entries(mut self, max: usize) -> Self {
        self.max_dynamic_entries = max;
        self
    }

    /// Sets whether the worker activates without waiting.
    #[must_use]
    pub const fn with_eager_activation(mut self, eager: bool) -> Self {
        self.eager_activation = eager;
        self
    }

    /// Replaces the critical asset list.
    #[must_use]
    pub fn with_critical_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the partition names for this version.
    #[must_use]
    pub fn cache_names(&self) -> CacheNames {
        CacheNames {
            static_name: format!("{}-static-{}", self.prefix, self.version),
            dynamic_name: format!("{}-dynamic-{}", self.prefix, self.version),
        }
    }
}

/// The two partition names owned by one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    /// Eagerly provisioned partition.
    pub static_name: String,
    /// Lazily populated, size-bounded partition.
    pub dynamic_name: String,
}

impl CacheNames {
    /// Whether `name` belongs to this version.
    #[must_use]
    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name || name == self.dynamic_name
    }
}

/// Proxy server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origin of the site being cached, e.g. `https://tools.example`.
    pub origin: String,
    /// Timeout for a single origin request.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8723,
            origin: "http://127.0.0.1:8080".to_string(),
            request_timeout_secs: 15,
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root directory of the disk-backed cache partitions.
    pub cache_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: data_dir.join("ombra-offline").join("cache"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cache policy.
    pub cache: CacheConfig,
    /// Proxy server.
    pub server: ServerConfig,
    /// Storage paths.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location.
    ///
    /// `OMBRA_CONFIG` wins; otherwise `<config_dir>/ombra-offline/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("OMBRA_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ombra-offline")
            .join("config.toml")
    }

    /// Parses a config from TOML text. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlDe`](crate::Error::TomlDe) if the text is not a valid config.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads the config at `path`, or the defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the config at `path`, writing a default template first if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be written or the file cannot be parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        Self::load(path)
    }

    /// Saves the config atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string_pretty(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
