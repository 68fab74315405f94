//! Filter engine adapter.
//!
//! [`FilterEngine`] is the narrow interface the reconciler drives. Every
//! mutating operation reports whether it changed anything ([`Outcome`]) or
//! fails with a [`ChainwardenError::Engine`](crate::error::ChainwardenError).

mod iptables;
#[cfg(test)]
pub mod memory;

use anyhow::Result;

#[cfg(test)]
use mockall::automock;

pub use iptables::IptablesEngine;

use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::rules::{HookPosition, HookRef, Rule, Target};

/// Result of a mutating engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The engine state was changed
    Applied,
    /// The engine was already in the requested state (chain already exists,
    /// chain or rule already absent)
    Unchanged,
}

/// Packet and byte counters of one chain rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleCounters {
    pub packets: u64,
    pub bytes: u64,
    pub target: Target,
}

/// Primitive operations on the packet filter.
///
/// Implementations must request the engine's wait-on-lock mode for every
/// mutating call.
#[cfg_attr(test, automock)]
pub trait FilterEngine: Send + Sync {
    /// Check whether a chain exists
    fn chain_exists(&self, chain: &str) -> Result<bool>;

    /// Create a user chain
    fn create_chain(&self, chain: &str) -> Result<Outcome>;

    /// Remove every rule from a chain
    fn flush_chain(&self, chain: &str) -> Result<Outcome>;

    /// Delete an empty, unreferenced chain
    fn delete_chain(&self, chain: &str) -> Result<Outcome>;

    /// Append a rule at the end of a chain
    fn append_rule(&self, chain: &str, rule: &Rule) -> Result<Outcome>;

    /// Insert a rule at a 1-based position
    fn insert_rule(&self, chain: &str, rule: &Rule, position: usize) -> Result<Outcome>;

    /// Delete the rule at a 1-based position. A position past the end is
    /// `Unchanged`.
    fn delete_rule_at(&self, chain: &str, position: usize) -> Result<Outcome>;

    /// Check whether a hook reference exists
    fn hook_exists(&self, hook: &HookRef) -> Result<bool>;

    /// Insert a hook reference at the front or back of its hook chain
    fn insert_hook(&self, hook: &HookRef, position: HookPosition) -> Result<Outcome>;

    /// Delete one instance of a hook reference
    fn delete_hook(&self, hook: &HookRef) -> Result<Outcome>;

    /// Rules of a chain in `-A CHAIN ...` form, in evaluation order
    fn list_rules(&self, chain: &str) -> Result<Vec<String>>;

    /// Per-rule counters of a chain, in evaluation order
    fn counters(&self, chain: &str) -> Result<Vec<RuleCounters>>;

    /// Full serialized filter state
    fn dump(&self) -> Result<String>;
}

/// Create the iptables engine described by the configuration
pub fn create_engine(config: &Config) -> IptablesEngine<RealCommandExecutor> {
    IptablesEngine::with_executor(
        RealCommandExecutor,
        &config.iptables,
        &config.iptables_save,
    )
}

/// Check if running as root (effective UID == 0)
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid() has no preconditions, never fails and reads no memory
    // owned by Rust.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        return Err(crate::error::ChainwardenError::Permission(
            "this operation changes firewall rules and must run as root (try sudo)".to_string(),
        )
        .into());
    }
    Ok(())
}
