//! Status command implementation.

use anyhow::Result;

use crate::config::Config;
use crate::enforcer::{create_engine, FilterEngine};
use crate::status::StatusReporter;

/// Run the status command
pub fn run(config: &Config, json: bool) -> Result<()> {
    let engine = create_engine(config);
    execute(&engine, config, json)
}

pub fn execute(engine: &dyn FilterEngine, config: &Config, json: bool) -> Result<()> {
    let settings = config.chain_settings()?;
    let status = StatusReporter::new(engine, &settings, &config.backup_dir).report()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!();
        println!("{}", status);
        println!();
    }
    Ok(())
}
