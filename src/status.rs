//! Read-only status of the managed chain.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::{ChainSettings, ListMode};
use crate::enforcer::FilterEngine;
use crate::rules::{HookRef, Protocol};
use crate::snapshot::SnapshotManager;
use crate::utils::{format_bytes, format_count};

/// Hook references found for one configured protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookCount {
    pub protocol: Protocol,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub chain: String,
    pub hook: String,
    pub mode: ListMode,
    /// The chain exists
    pub active: bool,
    /// Chain rules in `-A` form, in evaluation order
    pub rules: Vec<String>,
    pub rule_count: usize,
    /// Rules matching a listed source (the local exemption excluded)
    pub entry_count: usize,
    pub blocked_packets: u64,
    pub blocked_bytes: u64,
    /// References matching the configured port set, per configured protocol
    pub hooks: Vec<HookCount>,
    /// References into the chain that do not match the configuration
    pub stray_hooks: usize,
    pub latest_snapshot: Option<PathBuf>,
}

impl ChainStatus {
    pub fn has_duplicates(&self) -> bool {
        self.hooks.iter().any(|h| h.count > 1)
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.active { "ACTIVE" } else { "not active" };
        writeln!(f, "Chain {} ({}): {}", self.chain, self.mode.as_str(), state)?;

        writeln!(f, "Hooks in {}:", self.hook)?;
        for hook in &self.hooks {
            let flag = if hook.count > 1 { " (duplicate)" } else { "" };
            writeln!(f, "  {}: {}{}", hook.protocol, hook.count, flag)?;
        }
        if self.stray_hooks > 0 {
            writeln!(f, "  stray: {} (run clean to remove)", self.stray_hooks)?;
        }

        if self.active {
            writeln!(f, "Rules: {} ({} entries)", self.rule_count, self.entry_count)?;
            writeln!(
                f,
                "Blocked: {} packets, {}",
                format_count(self.blocked_packets),
                format_bytes(self.blocked_bytes)
            )?;
            for rule in &self.rules {
                writeln!(f, "  {}", rule)?;
            }
        }

        match &self.latest_snapshot {
            Some(path) => write!(f, "Latest snapshot: {}", path.display()),
            None => write!(f, "Latest snapshot: none"),
        }
    }
}

/// Reads back the chain, its hook references and the backup directory
pub struct StatusReporter<'a> {
    engine: &'a dyn FilterEngine,
    settings: &'a ChainSettings,
    backup_dir: &'a Path,
}

impl<'a> StatusReporter<'a> {
    pub fn new(
        engine: &'a dyn FilterEngine,
        settings: &'a ChainSettings,
        backup_dir: &'a Path,
    ) -> Self {
        Self {
            engine,
            settings,
            backup_dir,
        }
    }

    /// Collect the status. An absent chain is reported, not an error.
    pub fn report(&self) -> Result<ChainStatus> {
        let settings = self.settings;
        let active = self.engine.chain_exists(&settings.chain)?;

        let mut status = ChainStatus {
            chain: settings.chain.clone(),
            hook: settings.hook.clone(),
            mode: settings.mode,
            active,
            rules: Vec::new(),
            rule_count: 0,
            entry_count: 0,
            blocked_packets: 0,
            blocked_bytes: 0,
            hooks: Vec::new(),
            stray_hooks: 0,
            latest_snapshot: self.latest_snapshot(),
        };

        let attached: Vec<HookRef> = self
            .engine
            .list_rules(&settings.hook)?
            .iter()
            .filter_map(|line| HookRef::parse_listing(line, &settings.hook, &settings.chain))
            .collect();
        status.hooks = settings
            .protocols
            .iter()
            .map(|&protocol| HookCount {
                protocol,
                count: attached
                    .iter()
                    .filter(|h| h.protocol == protocol && h.ports == settings.ports)
                    .count(),
            })
            .collect();
        status.stray_hooks = attached
            .len()
            .saturating_sub(status.hooks.iter().map(|h| h.count).sum());

        if !active {
            return Ok(status);
        }

        status.rules = self.engine.list_rules(&settings.chain)?;
        status.rule_count = status.rules.len();
        let local = settings.local_source.to_string();
        status.entry_count = status
            .rules
            .iter()
            .filter_map(|line| source_of(line))
            .filter(|source| *source != local)
            .count();

        match self.engine.counters(&settings.chain) {
            Ok(counters) => {
                for c in counters.iter().filter(|c| c.target.is_blocking()) {
                    status.blocked_packets += c.packets;
                    status.blocked_bytes += c.bytes;
                }
            }
            Err(e) => warn!("Cannot read counters of {}: {:#}", settings.chain, e),
        }

        Ok(status)
    }

    fn latest_snapshot(&self) -> Option<PathBuf> {
        SnapshotManager::new(self.backup_dir, self.engine)
            .latest()
            .unwrap_or_else(|e| {
                warn!("Cannot list snapshots: {:#}", e);
                None
            })
    }
}

/// Source network of an `-A` listing line
fn source_of(line: &str) -> Option<&str> {
    let mut words = line.split_whitespace();
    words.find(|w| *w == "-s")?;
    words.next()
}
