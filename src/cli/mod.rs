//! The `ombra` command line: serve the proxy, install a version, inspect or purge caches.

mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use crate::activate::{purge_all, purge_stale};
use crate::cache::{CacheStorage, DiskCacheStorage};
use crate::config::AppConfig;
use crate::error::Result;
use crate::network::{HttpNetwork, Network};
use crate::registration::Registration;
use crate::request::parse_origin;
use crate::server;
use crate::worker::OfflineWorker;

pub use output::PartitionSummary;

pub const USAGE: &str = "\
Usage: ombra <COMMAND> [OPTIONS]

Commands:
  serve               Install the configured version and run the caching proxy
  install             Install and activate the configured version, then exit
  status              List cache partitions and their entry counts
  purge [--all]       Delete stale partitions (or every partition with --all)
  config              Print the effective configuration

Options:
  --config <PATH>     Config file (default: $OMBRA_CONFIG or the user config dir)
  --origin <URL>      Site origin to cache
  --host <HOST>       Proxy bind address
  --port <PORT>       Proxy bind port
  -h, --help          Show this help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Serve,
    Install,
    Status,
    Purge { all: bool },
    Config,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub command: Command,
    pub config_path: PathBuf,
    pub origin: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Parses the arguments after the program name. `Ok(None)` means help was requested.
pub fn parse_args<I>(args: I) -> std::result::Result<Option<Options>, String>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let mut command = None;
    let mut all = false;
    let mut config_path = None;
    let mut origin = None;
    let mut host = None;
    let mut port = None;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut value = |flag: &str| {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match arg {
            "-h" | "--help" => return Ok(None),
            "--config" => config_path = Some(PathBuf::from(value(arg)?)),
            "--origin" => origin = Some(value(arg)?),
            "--host" => host = Some(value(arg)?),
            "--port" => {
                let raw = value(arg)?;
                port = Some(
                    raw.parse::<u16>()
                        .map_err(|e| format!("invalid --port {raw}: {e}"))?,
                );
            }
            "--all" => all = true,
            "serve" | "install" | "status" | "purge" | "config" if command.is_none() => {
                command = Some(arg.to_string());
            }
            other => return Err(format!("unexpected argument: {other}")),
        }
        i += 1;
    }

    let command = match command.as_deref() {
        None => return Ok(None),
        Some("serve") => Command::Serve,
        Some("install") => Command::Install,
        Some("status") => Command::Status,
        Some("purge") => Command::Purge { all },
        Some(_) => Command::Config,
    };
    if all && !matches!(command, Command::Purge { .. }) {
        return Err("--all only applies to purge".to_string());
    }

    Ok(Some(Options {
        command,
        config_path: config_path.unwrap_or_else(AppConfig::default_path),
        origin,
        host,
        port,
    }))
}

impl Options {
    /// Loads the config file (creating a template if missing) and applies flag overrides.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load_or_create(&self.config_path)?;
        if let Some(origin) = &self.origin {
            config.server.origin.clone_from(origin);
        }
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        Ok(config)
    }
}

/// Storage and network shared by every worker version of one run.
struct Site {
    origin: Url,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl Site {
    async fn open(config: &AppConfig) -> Result<Self> {
        let origin = parse_origin(&config.server.origin)?;
        let storage = DiskCacheStorage::new(&config.paths.cache_dir).await?;
        let network = HttpNetwork::with_timeout(
            origin.clone(),
            Duration::from_secs(config.server.request_timeout_secs),
        )?;
        Ok(Self {
            origin,
            storage: Arc::new(storage),
            network: Arc::new(network),
        })
    }

    fn worker(&self, config: &AppConfig) -> Result<OfflineWorker> {
        OfflineWorker::new(
            config.cache.clone(),
            self.origin.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.network),
        )
    }
}

/// Runs one command to completion.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded, the cache directory cannot
/// be opened, or the proxy cannot bind.
pub async fn run(options: Options) -> Result<()> {
    let config = options.load_config()?;
    log::debug!("Loaded config from {}", options.config_path.display());

    match options.command {
        Command::Serve => serve(&options, &config).await,
        Command::Install => install(&config).await,
        Command::Status => status(&config).await,
        Command::Purge { all } => purge(&config, all).await,
        Command::Config => {
            println!("{}", output::render_config(&options.config_path, &config)?);
            Ok(())
        }
    }
}

async fn install(config: &AppConfig) -> Result<()> {
    let site = Site::open(config).await?;
    let registration = Registration::new();
    let outcome = registration.register(site.worker(config)?).await?;
    println!("{}", output::render_install(&config.cache, &outcome));
    Ok(())
}

async fn status(config: &AppConfig) -> Result<()> {
    let storage = DiskCacheStorage::new(&config.paths.cache_dir).await?;
    let current = config.cache.cache_names();
    let mut partitions = Vec::new();
    for name in storage.names().await? {
        partitions.push(PartitionSummary {
            entries: storage.len(&name).await?,
            current: current.is_current(&name),
            name,
        });
    }
    println!("{}", output::render_status(config, &partitions));
    Ok(())
}

async fn purge(config: &AppConfig, all: bool) -> Result<()> {
    let storage = DiskCacheStorage::new(&config.paths.cache_dir).await?;
    let report = if all {
        purge_all(&storage).await
    } else {
        purge_stale(&storage, &config.cache.cache_names()).await
    };
    println!("{}", output::render_purge(&report));
    Ok(())
}

async fn serve(options: &Options, config: &AppConfig) -> Result<()> {
    let site = Site::open(config).await?;
    let registration = Arc::new(Registration::new());
    let outcome = registration.register(site.worker(config)?).await?;
    println!("{}", output::render_install(&config.cache, &outcome));

    let app = server::router(
        Arc::clone(&registration),
        Arc::clone(&site.network),
        site.origin.clone(),
    );
    let addr = server::run_server(&config.server.host, config.server.port, app).await?;
    println!(
        "Caching {} on {}",
        site.origin,
        console::style(format!("http://{addr}")).bold()
    );

    wait_for_shutdown(options, &site, &registration).await?;

    if let Some(active) = registration.active().await {
        active.settle().await;
    }
    Ok(())
}

/// Installs the version in a freshly reloaded config if it differs from the active one.
fn redeploy(options: &Options, site: &Site, registration: &Arc<Registration>) {
    let config = match options.load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Reload of {} failed: {e}", options.config_path.display());
            return;
        }
    };
    let worker = match site.worker(&config) {
        Ok(worker) => worker,
        Err(e) => {
            log::error!("Invalid reloaded config: {e}");
            return;
        }
    };

    let registration = Arc::clone(registration);
    tokio::spawn(async move {
        let active = registration.active().await;
        if active.is_some_and(|a| a.version() == worker.version()) {
            log::info!("Version {} already active", worker.version());
            return;
        }
        match registration.register(worker).await {
            Ok(outcome) => println!("{}", output::render_install(&config.cache, &outcome)),
            Err(e) => log::error!("Install of reloaded version failed: {e}"),
        }
    });
}

// Resolves on SIGINT or SIGTERM; SIGHUP reloads the config.
#[cfg(unix)]
async fn wait_for_shutdown(options: &Options, site: &Site, registration: &Arc<Registration>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received SIGINT");
                return Ok(());
            }
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM");
                return Ok(());
            }
            _ = sighup.recv() => {
                log::info!("Received SIGHUP, reloading {}", options.config_path.display());
                redeploy(options, site, registration);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_options: &Options, _site: &Site, _registration: &Arc<Registration>) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    log::info!("Received SIGINT");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Option<Options>, String> {
        parse_args(args.iter().map(ToString::to_string))
    }

    #[test]
    fn parses_commands_and_flags() {
        let options = parse(&[
            "serve",
            "--config",
            "/tmp/ombra.toml",
            "--origin",
            "https://tools.example",
            "--port",
            "9000",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(options.command, Command::Serve);
        assert_eq!(options.config_path, PathBuf::from("/tmp/ombra.toml"));
        assert_eq!(options.origin.as_deref(), Some("https://tools.example"));
        assert_eq!(options.port, Some(9000));
        assert_eq!(options.host, None);

        let purge = parse(&["--all", "purge"]).unwrap().unwrap();
        assert_eq!(purge.command, Command::Purge { all: true });
    }

    #[test]
    fn help_and_empty_args() {
        assert!(parse(&[]).unwrap().is_none());
        assert!(parse(&["status", "-h"]).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&["serve", "--port"]).is_err());
        assert!(parse(&["serve", "--port", "http"]).is_err());
        assert!(parse(&["serve", "install"]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["status", "--all"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let options = parse(&[
            "config",
            "--config",
            path.to_str().unwrap(),
            "--host",
            "0.0.0.0",
        ])
        .unwrap()
        .unwrap();

        let config = options.load_config().unwrap();
        assert!(path.exists());
        assert_eq!(config.server.host, "0.0.0.0");
        // The template on disk keeps the default.
        assert_eq!(AppConfig::load(&path).unwrap().server.host, "127.0.0.1");
    }

    #[tokio::test]
    async fn purge_all_clears_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.cache_dir = dir.path().join("cache");
        let storage = DiskCacheStorage::new(&config.paths.cache_dir).await.unwrap();
        storage.open("ombra-static-v3").await.unwrap();
        storage.open("ombra-static-v4").await.unwrap();

        purge(&config, false).await.unwrap();
        assert_eq!(storage.names().await.unwrap(), vec!["ombra-static-v4"]);

        purge(&config, true).await.unwrap();
        assert!(storage.names().await.unwrap().is_empty());
    }
}
