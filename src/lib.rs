//! # chainwarden - Whitelist/blacklist chain manager for iptables hosts
//!
//! Keeps one dedicated iptables chain in sync with an IP list and hooks it
//! into a built-in chain for a set of protocols and destination ports.
//!
//! ## Features
//!
//! - **Idempotent** - Repeated applies and reloads never stack duplicate hook references
//! - **Whitelist or blacklist** - ACCEPT list with REJECT tail, or DROP list with RETURN tail
//! - **Lockout-safe** - An empty whitelist installs no default-deny rule
//! - **Backed up** - The full filter state is saved before any change
//! - **Lock-aware** - Every iptables call waits on the xtables lock (`-w`)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      chainwarden                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: apply, clean, reload, backup, status       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml) ──► ChainSettings (immutable)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IP list loader (ipnet)                                     │
//! │    └── Validation, dedup, ordering                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler (state machine)      Status reporter (read-only)│
//! │    ├── apply / reload / clean                               │
//! │    └── Confirm capability                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Snapshot manager (iptables-save, tempfile)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (FilterEngine trait)                              │
//! │    └── IptablesEngine over CommandExecutor                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use chainwarden::config::Config;
//! use chainwarden::confirm::AssumeYes;
//! use chainwarden::enforcer::{check_root, create_engine};
//! use chainwarden::iplist;
//! use chainwarden::reconciler::Reconciler;
//! use chainwarden::snapshot::SnapshotManager;
//!
//! fn main() -> anyhow::Result<()> {
//!     check_root()?;
//!
//!     let config = Config::load("/etc/chainwarden/config.yaml")?;
//!     let settings = config.chain_settings()?;
//!     let engine = create_engine(&config);
//!
//!     let list = iplist::load(&config.ip_list)?;
//!     SnapshotManager::new(&config.backup_dir, &engine).take()?;
//!     Reconciler::new(&engine, &settings).apply(&list.entries, &AssumeYes)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - External command execution
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`confirm`] - Overwrite confirmation
//! - [`enforcer`] - Filter engine abstraction and iptables adapter
//! - [`error`] - Error types
//! - [`iplist`] - IP list loading
//! - [`logging`] - Console and log file setup
//! - [`reconciler`] - Chain reconciliation state machine
//! - [`rules`] - Rules, port sets and hook references
//! - [`snapshot`] - Pre-mutation backups
//! - [`status`] - Read-only status reporting
//! - [`utils`] - Formatting helpers
//! - [`validation`] - Input validation

pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod confirm;
pub mod enforcer;
pub mod error;
pub mod iplist;
pub mod logging;
pub mod reconciler;
pub mod rules;
pub mod snapshot;
pub mod status;
pub mod utils;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::ChainwardenError;
