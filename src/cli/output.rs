//! Human-readable reports for CLI commands.

use std::fmt::Write as _;
use std::path::Path;

use console::style;

use crate::activate::PurgeReport;
use crate::config::{AppConfig, CacheConfig};
use crate::error::Result;
use crate::registration::RegisterOutcome;

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// One partition line in `ombra status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub name: String,
    pub entries: usize,
    /// Owned by the configured version.
    pub current: bool,
}

pub fn render_install(config: &CacheConfig, outcome: &RegisterOutcome) -> String {
    let mut out = String::new();
    let provision = &outcome.provision;
    let _ = writeln!(out, "{SEPARATOR}");
    let _ = writeln!(out, "Installed {}", style(&config.version).bold());
    let _ = writeln!(out, "{SEPARATOR}");
    let _ = writeln!(
        out,
        "  Cached:   {} of {} static file(s)",
        provision.cached.len(),
        provision.cached.len() + provision.failed.len()
    );
    for (path, reason) in &provision.failed {
        let _ = writeln!(out, "  {} {path} ({reason})", style("✗").red());
    }

    match &outcome.activation {
        Some(activation) => {
            let _ = writeln!(out, "  State:    {}", style("active").green());
            for name in &activation.purge.deleted {
                let _ = writeln!(out, "  Deleted:  {name}");
            }
            for (name, reason) in &activation.purge.failed {
                let _ = writeln!(out, "  {} {name} not deleted ({reason})", style("✗").red());
            }
            if activation.claimed > 0 {
                let _ = writeln!(out, "  Claimed:  {} page(s)", activation.claimed);
            }
        }
        None => {
            let _ = writeln!(
                out,
                "  State:    {} (pages of the previous version are open)",
                style("waiting").yellow()
            );
        }
    }
    let _ = write!(out, "{SEPARATOR}");
    out
}

pub fn render_status(config: &AppConfig, partitions: &[PartitionSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Origin:     {}", config.server.origin);
    let _ = writeln!(out, "Version:    {}", config.cache.version);
    let _ = writeln!(out, "Cache dir:  {}", config.paths.cache_dir.display());
    let _ = writeln!(out, "{SEPARATOR}");

    if partitions.is_empty() {
        let _ = writeln!(out, "  No cache partitions.");
    }
    for partition in partitions {
        let marker = if partition.current {
            style("current").cyan()
        } else {
            style("stale").dim()
        };
        let _ = writeln!(
            out,
            "  {:<32} {:>5} entries  {marker}",
            partition.name, partition.entries
        );
    }
    let _ = write!(out, "{SEPARATOR}");
    out
}

pub fn render_purge(report: &PurgeReport) -> String {
    let mut out = String::new();
    if report.deleted.is_empty() && report.failed.is_empty() {
        return "Nothing to purge.".to_string();
    }
    for name in &report.deleted {
        let _ = writeln!(out, "  {} {name}", style("deleted").green());
    }
    for (name, reason) in &report.failed {
        let _ = writeln!(out, "  {} {name} ({reason})", style("failed").red());
    }
    let _ = write!(
        out,
        "{} deleted, {} failed",
        report.deleted.len(),
        report.failed.len()
    );
    out
}

pub fn render_config(path: &Path, config: &AppConfig) -> Result<String> {
    Ok(format!(
        "# {}\n{}",
        path.display(),
        toml::to_string_pretty(config)?
    ))
}
