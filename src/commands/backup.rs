//! Backup command implementation.

use anyhow::Result;

use crate::config::Config;
use crate::enforcer::{check_root, create_engine, FilterEngine};

/// Run the backup command
pub fn run(config: &Config) -> Result<()> {
    check_root()?;

    let engine = create_engine(config);
    execute(&engine, config)
}

pub fn execute(engine: &dyn FilterEngine, config: &Config) -> Result<()> {
    let path = super::take_snapshot(engine, config)?;
    println!("[OK] Filter state saved to {}", path.display());
    Ok(())
}
