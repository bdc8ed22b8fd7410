//! Per-role token accounting
//!
//! Four independent counters, one per `ModelRole`. Input and output are
//! running sums; the cache counters hold the most recent call's absolute
//! values because the host reports them per call, not as deltas.

use std::fmt;

use crate::llm::{ModelRole, Usage};
use crate::metrics::TOKENS_TOTAL;

/// Token tallies for one role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounters {
    pub input: u64,
    pub output: u64,
    pub cache_write: u64,
    pub cache_read: u64,
}

impl TokenCounters {
    /// Fold one call's usage into the counters
    pub fn record(&mut self, usage: &Usage) {
        self.input += usage.input_tokens;
        self.output += usage.output_tokens;
        self.cache_write = usage.cache_write_tokens;
        self.cache_read = usage.cache_read_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Counters for all four roles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenLedger {
    main: TokenCounters,
    tool_checker: TokenCounters,
    code_editor: TokenCounters,
    code_execution: TokenCounters,
}

impl TokenLedger {
    pub fn get(&self, role: ModelRole) -> &TokenCounters {
        match role {
            ModelRole::Main => &self.main,
            ModelRole::ToolChecker => &self.tool_checker,
            ModelRole::CodeEditor => &self.code_editor,
            ModelRole::CodeExecution => &self.code_execution,
        }
    }

    fn get_mut(&mut self, role: ModelRole) -> &mut TokenCounters {
        match role {
            ModelRole::Main => &mut self.main,
            ModelRole::ToolChecker => &mut self.tool_checker,
            ModelRole::CodeEditor => &mut self.code_editor,
            ModelRole::CodeExecution => &mut self.code_execution,
        }
    }

    /// Attribute one model call's usage to `role`
    pub fn record(&mut self, role: ModelRole, usage: &Usage) {
        self.get_mut(role).record(usage);

        let role = role.as_str();
        TOKENS_TOTAL
            .with_label_values(&[role, "input"])
            .inc_by(usage.input_tokens);
        TOKENS_TOTAL
            .with_label_values(&[role, "output"])
            .inc_by(usage.output_tokens);
        TOKENS_TOTAL
            .with_label_values(&[role, "cache_write"])
            .inc_by(usage.cache_write_tokens);
        TOKENS_TOTAL
            .with_label_values(&[role, "cache_read"])
            .inc_by(usage.cache_read_tokens);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Input plus output across every role
    pub fn grand_total(&self) -> u64 {
        ModelRole::ALL.iter().map(|r| self.get(*r).total()).sum()
    }

    pub fn report(&self) -> TokenReport {
        TokenReport {
            rows: ModelRole::ALL
                .iter()
                .map(|r| (*r, *self.get(*r)))
                .collect(),
        }
    }
}

/// Snapshot of the ledger for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenReport {
    pub rows: Vec<(ModelRole, TokenCounters)>,
}

impl fmt::Display for TokenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>10} {:>10} {:>12} {:>11}",
            "role", "input", "output", "cache_write", "cache_read"
        )?;
        let mut total = 0;
        for (role, c) in &self.rows {
            writeln!(
                f,
                "{:<16} {:>10} {:>10} {:>12} {:>11}",
                role.as_str(),
                c.input,
                c.output,
                c.cache_write,
                c.cache_read
            )?;
            total += c.total();
        }
        write!(f, "total (input + output): {}", total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64, write: u64, read: u64) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
            cache_write_tokens: write,
            cache_read_tokens: read,
        }
    }

    #[test]
    fn test_input_output_sum_cache_overwrites() {
        let mut counters = TokenCounters::default();
        counters.record(&usage(100, 20, 500, 0));
        counters.record(&usage(40, 10, 0, 500));

        assert_eq!(counters.input, 140);
        assert_eq!(counters.output, 30);
        assert_eq!(counters.cache_write, 0);
        assert_eq!(counters.cache_read, 500);
    }

    #[test]
    fn test_roles_are_independent() {
        let mut ledger = TokenLedger::default();
        ledger.record(ModelRole::Main, &usage(10, 5, 0, 0));
        ledger.record(ModelRole::CodeEditor, &usage(7, 3, 0, 0));

        assert_eq!(ledger.get(ModelRole::Main).input, 10);
        assert_eq!(ledger.get(ModelRole::CodeEditor).input, 7);
        assert_eq!(*ledger.get(ModelRole::ToolChecker), TokenCounters::default());
        assert_eq!(ledger.grand_total(), 25);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut ledger = TokenLedger::default();
        for role in ModelRole::ALL {
            ledger.record(role, &usage(1, 1, 1, 1));
        }
        ledger.reset();
        assert_eq!(ledger, TokenLedger::default());
    }

    #[test]
    fn test_report_lists_every_role() {
        let ledger = TokenLedger::default();
        let text = ledger.report().to_string();
        for role in ModelRole::ALL {
            assert!(text.contains(role.as_str()));
        }
    }
}
