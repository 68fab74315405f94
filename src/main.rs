//! chainwarden - Whitelist/blacklist chain manager for iptables hosts

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::{error, Level};

use chainwarden::cli::{Cli, Commands};
use chainwarden::commands;
use chainwarden::config::Config;
use chainwarden::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let config = match Config::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // No log path could be read, so record the failure in the default one
            logging::init(log_level, &Config::default().log_file);
            error!("{:#}", e);
            return Err(e);
        }
    };
    logging::init(log_level, &config.log_file);

    let result = match command {
        Commands::Apply { yes, ip_list } => commands::apply::run(&config, yes, ip_list.as_deref()),
        Commands::Clean => commands::clean::run(&config),
        Commands::Reload { ip_list } => commands::reload::run(&config, ip_list.as_deref()),
        Commands::Backup => commands::backup::run(&config),
        Commands::Status { json } => commands::status::run(&config, json),
    };

    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}
