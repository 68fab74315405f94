//! In-memory filter engine for reconciler tests.
//!
//! Mirrors the iptables behaviours the reconciler depends on: chains must be
//! empty and unreferenced to be deleted, hooks can only target existing
//! chains, and duplicate hook references are allowed.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{FilterEngine, Outcome, RuleCounters};
use crate::error::ChainwardenError;
use crate::rules::{HookPosition, HookRef, Rule};

#[derive(Default)]
struct State {
    chains: BTreeMap<String, Vec<Rule>>,
    hooks: Vec<HookRef>,
    /// Mutating calls in order, e.g. "-N WL" or "-D INPUT"
    mutations: Vec<String>,
    /// Chains and hooks as left by each mutating call
    frames: Vec<(BTreeMap<String, Vec<Rule>>, Vec<HookRef>)>,
    /// Operation flag ("-N", "-I", ...) that fails on its next use
    fail_on: Option<&'static str>,
}

/// One chain as it stood after a mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainFrame {
    pub mutation: String,
    /// `None` while the chain does not exist
    pub rules: Option<Vec<Rule>>,
    /// Some hook reference jumps into the chain
    pub hooked: bool,
}

/// Engine holding chains and hook references in memory
#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook reference directly, bypassing checks (simulates leftovers)
    pub fn seed_hook(&self, hook: HookRef) {
        let mut state = self.state.lock().unwrap();
        state.chains.entry(hook.chain.clone()).or_default();
        state.hooks.push(hook);
    }

    /// Make the next call of `op` fail with an engine error
    pub fn fail_next(&self, op: &'static str) {
        self.state.lock().unwrap().fail_on = Some(op);
    }

    pub fn rules(&self, chain: &str) -> Option<Vec<Rule>> {
        self.state.lock().unwrap().chains.get(chain).cloned()
    }

    pub fn hooks(&self) -> Vec<HookRef> {
        self.state.lock().unwrap().hooks.clone()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    /// `chain` after every mutating call so far, in call order
    pub fn history(&self, chain: &str) -> Vec<ChainFrame> {
        let state = self.state.lock().unwrap();
        state
            .mutations
            .iter()
            .zip(&state.frames)
            .map(|(mutation, (chains, hooks))| ChainFrame {
                mutation: mutation.clone(),
                rules: chains.get(chain).cloned(),
                hooked: hooks.iter().any(|h| h.chain == chain),
            })
            .collect()
    }

    fn mutate<T>(
        &self,
        op: &'static str,
        target: &str,
        f: impl FnOnce(&mut State) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("{} {}", op, target));
        let result = if state.fail_on == Some(op) {
            state.fail_on = None;
            Err(ChainwardenError::engine(
                format!("iptables -w {} {}", op, target),
                "injected failure",
                Some(1),
            )
            .into())
        } else {
            f(&mut state)
        };
        let frame = (state.chains.clone(), state.hooks.clone());
        state.frames.push(frame);
        result
    }
}

fn missing_chain(op: &str, chain: &str) -> anyhow::Error {
    ChainwardenError::engine(
        format!("iptables -w {} {}", op, chain),
        "iptables: No chain/target/match by that name.",
        Some(1),
    )
    .into()
}

fn render_rule(chain: &str, rule: &Rule) -> String {
    format!("-A {} {}", chain, rule.to_args().join(" "))
}

impl FilterEngine for MemoryEngine {
    fn chain_exists(&self, chain: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().chains.contains_key(chain))
    }

    fn create_chain(&self, chain: &str) -> Result<Outcome> {
        self.mutate("-N", chain, |state| {
            if state.chains.contains_key(chain) {
                return Ok(Outcome::Unchanged);
            }
            state.chains.insert(chain.to_string(), Vec::new());
            Ok(Outcome::Applied)
        })
    }

    fn flush_chain(&self, chain: &str) -> Result<Outcome> {
        self.mutate("-F", chain, |state| match state.chains.get_mut(chain) {
            Some(rules) => {
                rules.clear();
                Ok(Outcome::Applied)
            }
            None => Ok(Outcome::Unchanged),
        })
    }

    fn delete_chain(&self, chain: &str) -> Result<Outcome> {
        self.mutate("-X", chain, |state| {
            let Some(rules) = state.chains.get(chain) else {
                return Ok(Outcome::Unchanged);
            };
            if state.hooks.iter().any(|h| h.chain == chain) {
                return Err(ChainwardenError::engine("iptables -w -X", "Too many links.", Some(1)).into());
            }
            if !rules.is_empty() {
                return Err(
                    ChainwardenError::engine("iptables -w -X", "Directory not empty.", Some(1)).into(),
                );
            }
            state.chains.remove(chain);
            Ok(Outcome::Applied)
        })
    }

    fn append_rule(&self, chain: &str, rule: &Rule) -> Result<Outcome> {
        self.mutate("-A", chain, |state| match state.chains.get_mut(chain) {
            Some(rules) => {
                rules.push(rule.clone());
                Ok(Outcome::Applied)
            }
            None => Err(missing_chain("-A", chain)),
        })
    }

    fn insert_rule(&self, chain: &str, rule: &Rule, position: usize) -> Result<Outcome> {
        self.mutate("-I", chain, |state| match state.chains.get_mut(chain) {
            Some(rules) => {
                let index = position.saturating_sub(1).min(rules.len());
                rules.insert(index, rule.clone());
                Ok(Outcome::Applied)
            }
            None => Err(missing_chain("-I", chain)),
        })
    }

    fn delete_rule_at(&self, chain: &str, position: usize) -> Result<Outcome> {
        self.mutate("-D", chain, |state| match state.chains.get_mut(chain) {
            Some(rules) => {
                let index = position.max(1) - 1;
                if index >= rules.len() {
                    return Ok(Outcome::Unchanged);
                }
                rules.remove(index);
                Ok(Outcome::Applied)
            }
            None => Err(missing_chain("-D", chain)),
        })
    }

    fn hook_exists(&self, hook: &HookRef) -> Result<bool> {
        Ok(self.state.lock().unwrap().hooks.contains(hook))
    }

    fn insert_hook(&self, hook: &HookRef, position: HookPosition) -> Result<Outcome> {
        self.mutate("-I", &hook.hook, |state| {
            if !state.chains.contains_key(&hook.chain) {
                return Err(missing_chain("-I", &hook.chain));
            }
            match position {
                HookPosition::Front => state.hooks.insert(0, hook.clone()),
                HookPosition::Back => state.hooks.push(hook.clone()),
            }
            Ok(Outcome::Applied)
        })
    }

    fn delete_hook(&self, hook: &HookRef) -> Result<Outcome> {
        self.mutate("-D", &hook.hook, |state| {
            match state.hooks.iter().position(|h| h == hook) {
                Some(index) => {
                    state.hooks.remove(index);
                    Ok(Outcome::Applied)
                }
                None => Ok(Outcome::Unchanged),
            }
        })
    }

    fn list_rules(&self, chain: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if let Some(rules) = state.chains.get(chain) {
            return Ok(rules.iter().map(|r| render_rule(chain, r)).collect());
        }
        // Any other name is treated as a built-in hook chain
        Ok(state
            .hooks
            .iter()
            .filter(|h| h.hook == chain)
            .map(|h| format!("-A {} {}", h.hook, h.to_args().join(" ")))
            .collect())
    }

    fn counters(&self, chain: &str) -> Result<Vec<RuleCounters>> {
        let state = self.state.lock().unwrap();
        let rules = state.chains.get(chain).ok_or_else(|| missing_chain("-L", chain))?;
        Ok(rules
            .iter()
            .map(|r| RuleCounters {
                packets: 0,
                bytes: 0,
                target: r.target,
            })
            .collect())
    }

    fn dump(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        let mut out = String::from("*filter\n:INPUT ACCEPT [0:0]\n");
        for name in state.chains.keys() {
            out.push_str(&format!(":{} - [0:0]\n", name));
        }
        for hook in &state.hooks {
            out.push_str(&format!("-A {} {}\n", hook.hook, hook.to_args().join(" ")));
        }
        for (name, rules) in &state.chains {
            for rule in rules {
                out.push_str(&render_rule(name, rule));
                out.push('\n');
            }
        }
        out.push_str("COMMIT\n");
        Ok(out)
    }
}
