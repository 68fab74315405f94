//! Overwrite confirmation.
//!
//! The reconciler asks before tearing down an existing chain. The answer comes
//! from an injected [`Confirm`] implementation so the decision can be scripted.

use std::io::{BufRead, IsTerminal, Write};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Answers yes/no questions
#[cfg_attr(test, automock)]
pub trait Confirm {
    fn confirm(&self, question: &str) -> bool;
}

/// Always answers yes (`--yes`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

/// Asks on the terminal; declines when stdin is not interactive
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, question: &str) -> bool {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            warn!("{} Not asking: stdin is not a terminal (pass --yes to confirm)", question);
            return false;
        }

        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{} [y/N]: ", question);
        let _ = stderr.flush();

        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        is_yes(&answer)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
