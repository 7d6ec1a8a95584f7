//! Validated attempt budgets for every probe of a run.

use dockcheck_common::config::{BudgetSpec, ProbeBudgets};
use dockcheck_common::error::{HarnessError, Result};
use dockcheck_retry::AttemptBudget;

/// One [`AttemptBudget`] per readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    /// Server endpoint availability.
    pub endpoint_up: AttemptBudget,
    /// Worker registration.
    pub node_count: AttemptBudget,
    /// Unit-of-work completion.
    pub terminal_state: AttemptBudget,
}

impl Budgets {
    /// Validates the configured budgets.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] naming the first invalid budget.
    pub fn from_config(budgets: &ProbeBudgets) -> Result<Self> {
        Ok(Self {
            endpoint_up: convert("endpoint_up", budgets.endpoint_up)?,
            node_count: convert("node_count", budgets.node_count)?,
            terminal_state: convert("terminal_state", budgets.terminal_state)?,
        })
    }
}

fn convert(name: &str, spec: BudgetSpec) -> Result<AttemptBudget> {
    AttemptBudget::try_from(spec).map_err(|e| HarnessError::Config {
        message: format!("budgets.{name}: {e}"),
    })
}
