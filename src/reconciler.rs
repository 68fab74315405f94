//! Chain reconciliation.
//!
//! Brings the managed chain and its hook references from whatever state the
//! filter is in to the desired state (`apply`, `reload`), or removes them
//! (`clean`). The filter engine has no transactions: a fatal error leaves
//! partial state behind, which the next `apply` with overwrite tears down.

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::ChainSettings;
use crate::confirm::Confirm;
use crate::enforcer::{FilterEngine, Outcome};
use crate::rules::{HookRef, Rule, Target};

/// Observed state of the managed chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// The chain does not exist
    Absent,
    /// The chain exists and holds no rules
    PresentEmpty,
    /// The chain exists and holds rules
    PresentPopulated,
    /// The hook chain jumps into the chain for at least one protocol
    Hooked,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChainState::Absent => "absent",
            ChainState::PresentEmpty => "present, empty",
            ChainState::PresentPopulated => "present, populated",
            ChainState::Hooked => "hooked",
        })
    }
}

/// What a chain build wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Listed entries written
    pub entries: usize,
    /// Rules written, including the local exemption and the tail
    pub rules: usize,
    /// Catch-all rule closing the chain
    pub terminal: Option<Target>,
    /// Hook references newly inserted
    pub hooks_inserted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// An existing chain was torn down first
    pub replaced: bool,
    pub build: BuildReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(ApplyReport),
    /// Overwrite was declined; nothing was changed
    Declined,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub hooks_removed: usize,
    pub chain_removed: bool,
}

impl CleanReport {
    pub fn is_noop(&self) -> bool {
        self.hooks_removed == 0 && !self.chain_removed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    /// The chain was absent and built from scratch
    pub created: bool,
    pub build: BuildReport,
}

/// Drives one managed chain through a [`FilterEngine`]
pub struct Reconciler<'a> {
    engine: &'a dyn FilterEngine,
    settings: &'a ChainSettings,
}

impl<'a> Reconciler<'a> {
    pub fn new(engine: &'a dyn FilterEngine, settings: &'a ChainSettings) -> Self {
        Self { engine, settings }
    }

    fn chain(&self) -> &str {
        &self.settings.chain
    }

    /// Inspect the current state of the chain
    pub fn observe(&self) -> Result<ChainState> {
        if !self.engine.chain_exists(self.chain())? {
            return Ok(ChainState::Absent);
        }
        if !self.attached_hooks()?.is_empty() {
            return Ok(ChainState::Hooked);
        }
        if self.engine.list_rules(self.chain())?.is_empty() {
            Ok(ChainState::PresentEmpty)
        } else {
            Ok(ChainState::PresentPopulated)
        }
    }

    /// Rules the chain should hold for `entries`, in evaluation order
    pub fn desired_rules(&self, entries: &[Ipv4Net]) -> Vec<Rule> {
        let mode = self.settings.mode;
        let mut rules = Vec::with_capacity(entries.len() + 2);
        rules.push(Rule::from_source(self.settings.local_source, mode.local_target()));
        rules.extend(
            entries
                .iter()
                .map(|&net| Rule::from_source(net, mode.entry_target())),
        );
        if let Some(target) = mode.terminal_target(entries.len()) {
            rules.push(Rule::terminal(target));
        }
        rules
    }

    /// Build the chain from scratch and hook it.
    ///
    /// An existing chain is only replaced when `confirm` agrees; declining
    /// leaves the filter untouched.
    pub fn apply(&self, entries: &[Ipv4Net], confirm: &dyn Confirm) -> Result<ApplyOutcome> {
        let state = self.observe()?;
        let replaced = state != ChainState::Absent;

        if replaced {
            let question = format!(
                "Chain {} already exists ({}). Remove it and rebuild?",
                self.chain(),
                state
            );
            if !confirm.confirm(&question) {
                warn!("Rebuild of chain {} declined, nothing changed", self.chain());
                return Ok(ApplyOutcome::Declined);
            }
            info!("Tearing down existing chain {}", self.chain());
            self.clean()?;
        }

        let build = self.build(entries)?;
        Ok(ApplyOutcome::Applied(ApplyReport { replaced, build }))
    }

    /// Repopulate the chain in place, or build it if absent.
    ///
    /// The new rules are inserted ahead of the old ones, which are then
    /// deleted from behind them, so a hooked chain is never empty and keeps
    /// its catch-all rule throughout. Hook references are only inserted
    /// where missing, so repeated reloads never stack duplicates.
    pub fn reload(&self, entries: &[Ipv4Net]) -> Result<ReloadReport> {
        if !self.engine.chain_exists(self.chain())? {
            info!("Chain {} is absent, building it", self.chain());
            return Ok(ReloadReport {
                created: true,
                build: self.build(entries)?,
            });
        }

        let stale = self
            .engine
            .list_rules(self.chain())
            .with_context(|| format!("Failed to list chain {}", self.chain()))?
            .len();
        let mut build = self.populate_ahead(entries)?;
        self.drop_stale(build.rules, stale)?;
        build.hooks_inserted = self.ensure_hooks()?;

        Ok(ReloadReport {
            created: false,
            build,
        })
    }

    /// Unhook and delete the chain.
    ///
    /// Failures here are logged and swallowed; a chain that is already absent
    /// is a no-op.
    pub fn clean(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();

        if !self.engine.chain_exists(self.chain())? {
            info!("Chain {} is not present, nothing to clean", self.chain());
            return Ok(report);
        }

        for hook in self.settings.hook_refs() {
            report.hooks_removed += self.remove_until_absent(&hook);
        }

        // References left by an earlier run with other protocols or ports
        match self.attached_hooks() {
            Ok(mut stray) => {
                stray.dedup();
                for hook in stray {
                    warn!("Removing stray hook reference {}", hook);
                    report.hooks_removed += self.remove_until_absent(&hook);
                }
            }
            Err(e) => warn!(
                "Cannot list {} for stray references: {:#}",
                self.settings.hook, e
            ),
        }

        tolerate(self.engine.flush_chain(self.chain()), "flush chain", self.chain());
        report.chain_removed = tolerate(
            self.engine.delete_chain(self.chain()),
            "delete chain",
            self.chain(),
        ) == Some(Outcome::Applied);

        if report.chain_removed {
            info!(
                "Removed chain {} and {} hook reference(s)",
                self.chain(),
                report.hooks_removed
            );
        }
        Ok(report)
    }

    fn build(&self, entries: &[Ipv4Net]) -> Result<BuildReport> {
        let created = self
            .engine
            .create_chain(self.chain())
            .with_context(|| format!("Failed to create chain {}", self.chain()))?;
        match created {
            Outcome::Applied => info!("Created chain {}", self.chain()),
            Outcome::Unchanged => {
                warn!("Chain {} already exists, flushing it before populating", self.chain());
                self.engine
                    .flush_chain(self.chain())
                    .with_context(|| format!("Failed to flush chain {}", self.chain()))?;
            }
        }

        let mut build = self.populate(entries)?;
        build.hooks_inserted = self.ensure_hooks()?;
        Ok(build)
    }

    fn populate(&self, entries: &[Ipv4Net]) -> Result<BuildReport> {
        let rules = self.desired_rules(entries);
        for rule in &rules {
            self.engine
                .append_rule(self.chain(), rule)
                .with_context(|| format!("Failed to append rule to chain {}", self.chain()))?;
        }
        Ok(self.written(entries, &rules))
    }

    /// Insert the desired rules at the head of the chain, in order
    fn populate_ahead(&self, entries: &[Ipv4Net]) -> Result<BuildReport> {
        let rules = self.desired_rules(entries);
        for (index, rule) in rules.iter().enumerate() {
            self.engine
                .insert_rule(self.chain(), rule, index + 1)
                .with_context(|| format!("Failed to insert rule into chain {}", self.chain()))?;
        }
        Ok(self.written(entries, &rules))
    }

    /// Delete the `stale` rules sitting behind the first `kept` ones
    fn drop_stale(&self, kept: usize, stale: usize) -> Result<()> {
        for removed in 0..stale {
            let outcome = self
                .engine
                .delete_rule_at(self.chain(), kept + 1)
                .with_context(|| format!("Failed to delete old rule from chain {}", self.chain()))?;
            if outcome == Outcome::Unchanged {
                warn!(
                    "Chain {} ran out of old rules after {} of {} deletions",
                    self.chain(),
                    removed,
                    stale
                );
                break;
            }
        }
        debug!("Dropped {} old rules from chain {}", stale, self.chain());
        Ok(())
    }

    fn written(&self, entries: &[Ipv4Net], rules: &[Rule]) -> BuildReport {
        let terminal = self.settings.mode.terminal_target(entries.len());
        if terminal.is_none() {
            warn!(
                "No entries in {} chain {}: no default {} rule installed",
                self.settings.mode.as_str(),
                self.chain(),
                Target::Reject
            );
        }
        info!(
            "Wrote {} rules ({} entries) to chain {}",
            rules.len(),
            entries.len(),
            self.chain()
        );

        BuildReport {
            entries: entries.len(),
            rules: rules.len(),
            terminal,
            hooks_inserted: 0,
        }
    }

    fn ensure_hooks(&self) -> Result<usize> {
        let mut inserted = 0;
        for hook in self.settings.hook_refs() {
            if self.engine.hook_exists(&hook)? {
                debug!("Hook reference {} already present", hook);
                continue;
            }
            self.engine
                .insert_hook(&hook, self.settings.hook_position)
                .with_context(|| format!("Failed to insert hook reference {}", hook))?;
            info!("Inserted hook reference {}", hook);
            inserted += 1;
        }
        Ok(inserted)
    }

    /// References in the hook chain that jump into the managed chain
    fn attached_hooks(&self) -> Result<Vec<HookRef>> {
        Ok(self
            .engine
            .list_rules(&self.settings.hook)?
            .iter()
            .filter_map(|line| HookRef::parse_listing(line, &self.settings.hook, self.chain()))
            .collect())
    }

    /// Delete a hook reference until the engine reports it absent, bounded by
    /// `max_delete_attempts`. Returns the number of references removed.
    fn remove_until_absent(&self, hook: &HookRef) -> usize {
        let mut removed = 0;
        for _ in 0..self.settings.max_delete_attempts {
            match self.engine.delete_hook(hook) {
                Ok(Outcome::Applied) => {
                    removed += 1;
                    debug!("Deleted hook reference {} ({})", hook, removed);
                    if !self.settings.delete_backoff.is_zero() {
                        std::thread::sleep(self.settings.delete_backoff);
                    }
                }
                Ok(Outcome::Unchanged) => {
                    if removed > 1 {
                        warn!("Removed {} duplicate references {}", removed, hook);
                    }
                    return removed;
                }
                Err(e) => {
                    warn!("Failed to delete hook reference {}: {:#}", hook, e);
                    return removed;
                }
            }
        }

        warn!(
            "Hook reference {} still present after {} deletions, giving up",
            hook, self.settings.max_delete_attempts
        );
        removed
    }
}

/// Log a failed cleanup step at WARN and carry on
fn tolerate(result: Result<Outcome>, step: &str, chain: &str) -> Option<Outcome> {
    match result {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("Could not {} {}: {:#}", step, chain, e);
            None
        }
    }
}
