//! Clean command implementation.

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::enforcer::{check_root, create_engine, FilterEngine};
use crate::reconciler::Reconciler;

/// Run the clean command
pub fn run(config: &Config) -> Result<()> {
    check_root()?;

    let engine = create_engine(config);
    execute(&engine, config)
}

pub fn execute(engine: &dyn FilterEngine, config: &Config) -> Result<()> {
    let settings = config.chain_settings()?;

    info!("Removing chain {}...", settings.chain);
    super::take_snapshot(engine, config)?;

    let report = Reconciler::new(engine, &settings).clean()?;
    if report.is_noop() {
        println!("[OK] Chain {} was not present", settings.chain);
    } else {
        println!(
            "[OK] Chain {} removed ({} hook reference(s) deleted)",
            settings.chain, report.hooks_removed
        );
    }

    super::print_status(engine, &settings, config);
    Ok(())
}
