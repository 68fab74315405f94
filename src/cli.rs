//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "chainwarden")]
#[command(author, version, about = "Whitelist/blacklist chain manager for iptables hosts")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the chain from the IP list and hook it
    #[command(alias = "start")]
    Apply {
        /// Replace an existing chain without asking
        #[arg(short, long)]
        yes: bool,

        /// IP list to load instead of the configured one
        #[arg(long)]
        ip_list: Option<PathBuf>,
    },

    /// Unhook and delete the chain
    #[command(alias = "stop")]
    Clean,

    /// Repopulate the chain from the IP list without recreating it
    Reload {
        /// IP list to load instead of the configured one
        #[arg(long)]
        ip_list: Option<PathBuf>,
    },

    /// Save a snapshot of the current filter state
    Backup,

    /// Show chain, hook and snapshot status
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}
