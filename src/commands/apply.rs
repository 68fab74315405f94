//! Apply command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::confirm::{AssumeYes, Confirm, TerminalPrompt};
use crate::enforcer::{check_root, create_engine, FilterEngine};
use crate::reconciler::{ApplyOutcome, Reconciler};

/// Run the apply command
pub fn run(config: &Config, yes: bool, ip_list: Option<&Path>) -> Result<()> {
    check_root()?;

    let engine = create_engine(config);
    if yes {
        execute(&engine, config, &AssumeYes, ip_list)
    } else {
        execute(&engine, config, &TerminalPrompt, ip_list)
    }
}

pub fn execute(
    engine: &dyn FilterEngine,
    config: &Config,
    confirm: &dyn Confirm,
    ip_list: Option<&Path>,
) -> Result<()> {
    let settings = config.chain_settings()?;
    let entries = super::load_entries(config, ip_list)?;

    info!("Applying {} chain {}...", settings.mode.as_str(), settings.chain);
    super::take_snapshot(engine, config)?;

    match Reconciler::new(engine, &settings).apply(&entries, confirm)? {
        ApplyOutcome::Declined => {
            println!("[SKIP] Chain {} left unchanged", settings.chain);
            return Ok(());
        }
        ApplyOutcome::Applied(report) => {
            let verb = if report.replaced { "rebuilt" } else { "created" };
            println!(
                "[OK] Chain {} {} with {} entries, {} hook reference(s) inserted",
                settings.chain, verb, report.build.entries, report.build.hooks_inserted
            );
        }
    }

    super::print_status(engine, &settings, config);
    Ok(())
}
