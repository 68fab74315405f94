//! CLI command implementations.
//!
//! Each mutating command checks for root in `run`, then drives a
//! [`FilterEngine`] through `execute`: snapshot first, reconcile second,
//! status last.

pub mod apply;
pub mod backup;
pub mod clean;
pub mod reload;
pub mod status;

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{ChainSettings, Config};
use crate::enforcer::FilterEngine;
use crate::iplist;
use crate::snapshot::SnapshotManager;
use crate::status::StatusReporter;

/// Load the IP list, preferring `ip_list` over the configured path
fn load_entries(config: &Config, ip_list: Option<&Path>) -> Result<Vec<Ipv4Net>> {
    let path = ip_list.unwrap_or(config.ip_list.as_path());
    let list = iplist::load(path).context("No rule was changed")?;
    info!(
        "Loaded {} entries from {:?} ({} invalid, {} duplicates)",
        list.entries.len(),
        path,
        list.rejected,
        list.duplicates
    );
    Ok(list.entries)
}

/// Snapshot the filter state; no mutation may follow a failure
fn take_snapshot(engine: &dyn FilterEngine, config: &Config) -> Result<PathBuf> {
    SnapshotManager::new(&config.backup_dir, engine)
        .take()
        .context("Backup failed, no rule was changed")
}

/// Print the status after a mutating command. Failures only warn.
fn print_status(engine: &dyn FilterEngine, settings: &ChainSettings, config: &Config) {
    match StatusReporter::new(engine, settings, &config.backup_dir).report() {
        Ok(status) => {
            println!();
            println!("{}", status);
        }
        Err(e) => warn!("Cannot read back status: {:#}", e),
    }
}
