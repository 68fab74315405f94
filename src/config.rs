//! Configuration management for chainwarden.
//!
//! The configuration is read once at startup and resolved into an immutable
//! [`ChainSettings`] that is handed to the reconciler and the status reporter.

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ChainwardenError;
use crate::rules::{HookPosition, HookRef, PortSpec, Protocol, Target};
use crate::validation::{validate_chain_name, validate_protocols};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/chainwarden/config.yaml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the managed chain
    pub chain: String,

    /// Built-in chain the hook references are inserted into
    pub hook: String,

    /// Whitelist (default deny) or blacklist (default allow)
    pub mode: ListMode,

    /// Protocols to hook (tcp, udp, udplite, dccp, sctp)
    pub protocols: Vec<String>,

    /// Destination ports: "22", "80,443", "1000-2000". Empty matches all ports.
    pub ports: String,

    /// Insert hook references at the front or the back of the hook chain
    pub hook_position: HookPosition,

    /// Source network that is always exempt from the list
    pub local_source: Ipv4Net,

    /// IP list file (one IPv4 address or CIDR per line)
    pub ip_list: PathBuf,

    /// Directory receiving pre-mutation snapshots
    pub backup_dir: PathBuf,

    /// Append-only log file
    pub log_file: PathBuf,

    /// iptables binary
    pub iptables: String,

    /// iptables-save binary
    pub iptables_save: String,

    /// Pause between repeated hook deletions, in milliseconds
    pub delete_backoff_ms: u64,

    /// Upper bound on deletions of one hook reference during cleanup
    pub max_delete_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: "CHAINWARDEN".to_string(),
            hook: "INPUT".to_string(),
            mode: ListMode::Whitelist,
            protocols: vec!["tcp".to_string()],
            ports: "22".to_string(),
            hook_position: HookPosition::Front,
            local_source: Ipv4Net::new(std::net::Ipv4Addr::new(127, 0, 0, 0), 8)
                .expect("8 is a valid IPv4 prefix length"),
            ip_list: PathBuf::from("/etc/chainwarden/ip.list"),
            backup_dir: PathBuf::from("/var/backups/chainwarden"),
            log_file: PathBuf::from("/var/log/chainwarden.log"),
            iptables: "iptables".to_string(),
            iptables_save: "iptables-save".to_string(),
            delete_backoff_ms: 100,
            max_delete_attempts: 64,
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            debug!("No config at {:?}, using defaults", path.as_ref());
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_chain_name(&self.chain)
            .map_err(|e| ChainwardenError::Config(e.to_string()))?;

        if self.hook.is_empty()
            || !self
                .hook
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_".contains(c))
        {
            return Err(ChainwardenError::Config(format!("Invalid hook chain '{}'", self.hook)).into());
        }

        if self.hook == self.chain {
            return Err(ChainwardenError::Config(format!(
                "Chain '{}' cannot hook into itself",
                self.chain
            ))
            .into());
        }

        self.ports
            .parse::<PortSpec>()
            .map_err(|e| ChainwardenError::Config(e.to_string()))?;

        if !self.protocols.iter().any(|p| p.parse::<Protocol>().is_ok()) {
            return Err(ChainwardenError::Config(format!(
                "No supported protocol in {:?}",
                self.protocols
            ))
            .into());
        }

        if self.max_delete_attempts == 0 {
            return Err(ChainwardenError::Config(
                "max_delete_attempts must be greater than zero".to_string(),
            )
            .into());
        }

        if self.iptables.is_empty() || self.iptables_save.is_empty() {
            return Err(ChainwardenError::Config("iptables binaries must be set".to_string()).into());
        }

        Ok(())
    }

    /// Resolve the validated configuration into chain settings.
    ///
    /// Unsupported protocol names are logged and skipped.
    pub fn chain_settings(&self) -> Result<ChainSettings> {
        self.validate()?;

        Ok(ChainSettings {
            chain: self.chain.clone(),
            hook: self.hook.clone(),
            mode: self.mode,
            protocols: validate_protocols(&self.protocols),
            ports: self.ports.parse()?,
            hook_position: self.hook_position,
            local_source: self.local_source.trunc(),
            delete_backoff: Duration::from_millis(self.delete_backoff_ms),
            max_delete_attempts: self.max_delete_attempts,
        })
    }
}

/// Ordering strategy of the managed chain
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    /// Listed sources are accepted, everything else is rejected
    #[default]
    Whitelist,
    /// Listed sources are dropped, everything else returns to the hook
    Blacklist,
}

impl ListMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ListMode::Whitelist => "whitelist",
            ListMode::Blacklist => "blacklist",
        }
    }

    /// Disposition of listed sources
    pub fn entry_target(self) -> Target {
        match self {
            ListMode::Whitelist => Target::Accept,
            ListMode::Blacklist => Target::Drop,
        }
    }

    /// Disposition of the local source exemption
    pub fn local_target(self) -> Target {
        match self {
            ListMode::Whitelist => Target::Accept,
            ListMode::Blacklist => Target::Return,
        }
    }

    /// Catch-all rule closing the chain, given the number of listed entries.
    ///
    /// A whitelist with no entries gets no REJECT tail, which would lock out
    /// all traffic on the hooked ports.
    pub fn terminal_target(self, entries: usize) -> Option<Target> {
        match self {
            ListMode::Whitelist if entries == 0 => None,
            ListMode::Whitelist => Some(Target::Reject),
            ListMode::Blacklist => Some(Target::Return),
        }
    }
}

/// Immutable, resolved settings for one managed chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSettings {
    pub chain: String,
    pub hook: String,
    pub mode: ListMode,
    pub protocols: Vec<Protocol>,
    pub ports: PortSpec,
    pub hook_position: HookPosition,
    pub local_source: Ipv4Net,
    pub delete_backoff: Duration,
    pub max_delete_attempts: usize,
}

impl ChainSettings {
    /// Hook references wanted for the configured protocols
    pub fn hook_refs(&self) -> Vec<HookRef> {
        self.protocols
            .iter()
            .map(|&protocol| HookRef::new(&self.hook, protocol, self.ports.clone(), &self.chain))
            .collect()
    }
}
