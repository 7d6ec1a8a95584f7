//! Attempt budgets and delay policy.

use std::num::NonZeroU32;
use std::time::Duration;

use dockcheck_common::config::{Backoff, BudgetSpec};
use thiserror::Error;

/// Rejected budget parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    /// `max_attempts` was zero.
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    /// `base_delay` was larger than `max_delay`.
    #[error("base delay {base:?} exceeds max delay {max:?}")]
    BaseExceedsMax {
        /// Requested base delay.
        base: Duration,
        /// Requested maximum delay.
        max: Duration,
    },
}

/// Max-attempts and delay configuration governing one retry loop.
///
/// Invariants: at least one attempt, and `base_delay <= max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    max_attempts: NonZeroU32,
    base_delay: Duration,
    max_delay: Duration,
    backoff: Backoff,
}

impl AttemptBudget {
    /// Creates a fixed-delay budget.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_attempts` is zero or `base_delay > max_delay`.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, BudgetError> {
        let max_attempts = NonZeroU32::new(max_attempts).ok_or(BudgetError::ZeroAttempts)?;
        if base_delay > max_delay {
            return Err(BudgetError::BaseExceedsMax {
                base: base_delay,
                max: max_delay,
            });
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff: Backoff::Fixed,
        })
    }

    /// Creates a budget sleeping `delay` between every attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_attempts` is zero.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Result<Self, BudgetError> {
        Self::new(max_attempts, delay, delay)
    }

    /// Returns this budget with a different delay growth policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// Delay after the first failed attempt.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound on any single delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay growth policy.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay
                    .saturating_mul(1_u32 << exponent)
                    .min(self.max_delay)
            }
        }
    }
}

impl TryFrom<BudgetSpec> for AttemptBudget {
    type Error = BudgetError;

    fn try_from(spec: BudgetSpec) -> Result<Self, Self::Error> {
        Ok(Self::new(spec.max_attempts, spec.base_delay(), spec.max_delay())?
            .with_backoff(spec.backoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn zero_attempts_rejected() {
        assert_eq!(AttemptBudget::fixed(0, MS), Err(BudgetError::ZeroAttempts));
    }

    #[test]
    fn base_above_max_rejected() {
        let err = AttemptBudget::new(3, MS * 20, MS * 10).unwrap_err();
        assert!(matches!(err, BudgetError::BaseExceedsMax { .. }));
    }

    #[test]
    fn fixed_delay_ignores_attempt_number() {
        let budget = AttemptBudget::new(5, MS * 10, MS * 100).unwrap();
        assert_eq!(budget.delay_after(1), MS * 10);
        assert_eq!(budget.delay_after(4), MS * 10);
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let budget = AttemptBudget::new(10, MS * 10, MS * 50)
            .unwrap()
            .with_backoff(Backoff::Exponential);
        assert_eq!(budget.delay_after(1), MS * 10);
        assert_eq!(budget.delay_after(2), MS * 20);
        assert_eq!(budget.delay_after(3), MS * 40);
        assert_eq!(budget.delay_after(4), MS * 50);
        assert_eq!(budget.delay_after(40), MS * 50);
    }

    #[test]
    fn try_from_spec_carries_backoff() {
        let spec = BudgetSpec {
            max_attempts: 4,
            base_delay_ms: 5,
            max_delay_ms: 40,
            backoff: Backoff::Exponential,
        };
        let budget = AttemptBudget::try_from(spec).unwrap();
        assert_eq!(budget.max_attempts(), 4);
        assert_eq!(budget.backoff(), Backoff::Exponential);
        assert_eq!(budget.max_delay(), MS * 40);
    }
}
