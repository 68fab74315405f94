//! iptables engine implementation.

use anyhow::Result;
use tracing::debug;

use super::{FilterEngine, Outcome, RuleCounters};
use crate::cmd_abstraction::{args_to_strings, CommandExecutor, CommandOutput, RealCommandExecutor};
use crate::error::ChainwardenError;
use crate::rules::{HookPosition, HookRef, Rule, Target};

/// Wait for the xtables lock instead of failing when another process holds it
const WAIT_FLAG: &str = "-w";

/// stderr phrases meaning the chain or rule does not exist.
/// Covers both the legacy and the nf_tables flavours of iptables.
const NOT_FOUND_MARKERS: &[&str] = &[
    "No chain/target/match by that name",
    "does a matching rule exist",
    "Bad rule",
    "No such file or directory",
];

/// stderr phrases meaning a rule number is past the end of the chain
const INDEX_MARKERS: &[&str] = &["Index of deletion too big", "Invalid rule number"];

/// stderr phrases meaning the chain already exists
const EXISTS_MARKERS: &[&str] = &["Chain already exists", "File exists"];

/// Filter engine driving the `iptables` and `iptables-save` binaries
pub struct IptablesEngine<E: CommandExecutor = RealCommandExecutor> {
    executor: E,
    program: String,
    save_program: String,
}

impl IptablesEngine<RealCommandExecutor> {
    pub fn new() -> Self {
        Self::with_executor(RealCommandExecutor, "iptables", "iptables-save")
    }
}

impl Default for IptablesEngine<RealCommandExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> IptablesEngine<E> {
    pub fn with_executor(executor: E, program: &str, save_program: &str) -> Self {
        Self {
            executor,
            program: program.to_string(),
            save_program: save_program.to_string(),
        }
    }

    /// Path or name of the iptables binary
    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(WAIT_FLAG.to_string());
        full.extend_from_slice(args);
        debug!("{} {}", self.program, full.join(" "));
        self.executor.execute(&self.program, &full)
    }

    fn failure(&self, args: &[String], output: CommandOutput) -> anyhow::Error {
        ChainwardenError::engine(
            format!("{} {} {}", self.program, WAIT_FLAG, args.join(" ")),
            output.stderr,
            output.code,
        )
        .into()
    }

    /// Run a mutating command. Failures whose stderr matches `tolerated` mean
    /// the engine is already in the requested state.
    fn mutate(&self, args: Vec<String>, tolerated: &[&str]) -> Result<Outcome> {
        let output = self.run(&args)?;
        if output.success {
            return Ok(Outcome::Applied);
        }
        if output.stderr_mentions(tolerated) {
            debug!("No change needed for '{}': {}", args.join(" "), output.stderr);
            return Ok(Outcome::Unchanged);
        }
        Err(self.failure(&args, output))
    }

    fn query(&self, args: Vec<String>) -> Result<String> {
        let output = self.run(&args)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(self.failure(&args, output))
        }
    }
}

impl<E: CommandExecutor> FilterEngine for IptablesEngine<E> {
    fn chain_exists(&self, chain: &str) -> Result<bool> {
        let args = args_to_strings(&["-S", chain]);
        let output = self.run(&args)?;
        if output.success {
            Ok(true)
        } else if output.stderr_mentions(NOT_FOUND_MARKERS) {
            Ok(false)
        } else {
            Err(self.failure(&args, output))
        }
    }

    fn create_chain(&self, chain: &str) -> Result<Outcome> {
        self.mutate(args_to_strings(&["-N", chain]), EXISTS_MARKERS)
    }

    fn flush_chain(&self, chain: &str) -> Result<Outcome> {
        self.mutate(args_to_strings(&["-F", chain]), NOT_FOUND_MARKERS)
    }

    fn delete_chain(&self, chain: &str) -> Result<Outcome> {
        self.mutate(args_to_strings(&["-X", chain]), NOT_FOUND_MARKERS)
    }

    fn append_rule(&self, chain: &str, rule: &Rule) -> Result<Outcome> {
        let mut args = args_to_strings(&["-A", chain]);
        args.extend(rule.to_args());
        self.mutate(args, &[])
    }

    fn insert_rule(&self, chain: &str, rule: &Rule, position: usize) -> Result<Outcome> {
        let mut args = args_to_strings(&["-I", chain, &position.max(1).to_string()]);
        args.extend(rule.to_args());
        self.mutate(args, &[])
    }

    fn delete_rule_at(&self, chain: &str, position: usize) -> Result<Outcome> {
        let args = args_to_strings(&["-D", chain, &position.max(1).to_string()]);
        self.mutate(args, INDEX_MARKERS)
    }

    fn hook_exists(&self, hook: &HookRef) -> Result<bool> {
        let mut args = args_to_strings(&["-C", &hook.hook]);
        args.extend(hook.to_args());
        let output = self.run(&args)?;
        if output.success {
            Ok(true)
        } else if output.code == Some(1) || output.stderr_mentions(NOT_FOUND_MARKERS) {
            Ok(false)
        } else {
            Err(self.failure(&args, output))
        }
    }

    fn insert_hook(&self, hook: &HookRef, position: HookPosition) -> Result<Outcome> {
        let mut args = match position {
            HookPosition::Front => args_to_strings(&["-I", &hook.hook, "1"]),
            HookPosition::Back => args_to_strings(&["-A", &hook.hook]),
        };
        args.extend(hook.to_args());
        self.mutate(args, &[])
    }

    fn delete_hook(&self, hook: &HookRef) -> Result<Outcome> {
        let mut args = args_to_strings(&["-D", &hook.hook]);
        args.extend(hook.to_args());
        self.mutate(args, NOT_FOUND_MARKERS)
    }

    fn list_rules(&self, chain: &str) -> Result<Vec<String>> {
        let stdout = self.query(args_to_strings(&["-S", chain]))?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("-A "))
            .map(str::to_string)
            .collect())
    }

    fn counters(&self, chain: &str) -> Result<Vec<RuleCounters>> {
        let stdout = self.query(args_to_strings(&["-L", chain, "-v", "-n", "-x"]))?;
        Ok(stdout.lines().filter_map(parse_iptables_counters).collect())
    }

    fn dump(&self) -> Result<String> {
        debug!("{}", self.save_program);
        let output = self.executor.execute(&self.save_program, &[])?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(ChainwardenError::engine(self.save_program.clone(), output.stderr, output.code).into())
        }
    }
}

/// Parse one rule line of `iptables -L -v -n` output.
/// Format: "  123K  456M DROP  all  --  *  *  10.0.0.1  0.0.0.0/0"
/// Header lines and rules with a non-terminal target yield `None`.
fn parse_iptables_counters(line: &str) -> Option<RuleCounters> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }

    let packets = parse_human_number(parts[0])?;
    let bytes = parse_human_number(parts[1])?;
    let target = parts[2].parse::<Target>().ok()?;
    Some(RuleCounters {
        packets,
        bytes,
        target,
    })
}

/// Parse human-readable numbers (e.g., "123K", "456M")
fn parse_human_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_part, multiplier) = if let Some(stripped) = s.strip_suffix('K') {
        (stripped, 1_000u64)
    } else if let Some(stripped) = s.strip_suffix('M') {
        (stripped, 1_000_000u64)
    } else if let Some(stripped) = s.strip_suffix('G') {
        (stripped, 1_000_000_000u64)
    } else {
        (s, 1u64)
    };

    num_part
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}
