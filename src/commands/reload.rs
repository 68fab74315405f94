//! Reload command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::enforcer::{check_root, create_engine, FilterEngine};
use crate::reconciler::Reconciler;

/// Run the reload command
pub fn run(config: &Config, ip_list: Option<&Path>) -> Result<()> {
    check_root()?;

    let engine = create_engine(config);
    execute(&engine, config, ip_list)
}

pub fn execute(engine: &dyn FilterEngine, config: &Config, ip_list: Option<&Path>) -> Result<()> {
    let settings = config.chain_settings()?;
    let entries = super::load_entries(config, ip_list)?;

    info!("Reloading chain {}...", settings.chain);
    super::take_snapshot(engine, config)?;

    let report = Reconciler::new(engine, &settings).reload(&entries)?;
    if report.created {
        println!(
            "[OK] Chain {} was absent and has been built with {} entries",
            settings.chain, report.build.entries
        );
    } else {
        println!(
            "[OK] Chain {} reloaded with {} entries",
            settings.chain, report.build.entries
        );
    }

    super::print_status(engine, &settings, config);
    Ok(())
}
