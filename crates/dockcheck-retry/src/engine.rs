//! The blocking retry loop.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::budget::AttemptBudget;

/// A failed attempt, as seen by an observer.
#[derive(Debug)]
pub struct AttemptFailure<'a, E> {
    /// The failure returned by the operation.
    pub error: &'a E,
    /// 1-based number of the attempt that failed.
    pub attempt: u32,
    /// Time elapsed since the first attempt started.
    pub elapsed: Duration,
}

/// Why a retry loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every attempt in the budget failed.
    BudgetSpent,
    /// The operation reported a failure that retrying cannot fix.
    Permanent,
    /// The next attempt would have started past the deadline.
    Deadline,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetSpent => write!(f, "budget spent"),
            Self::Permanent => write!(f, "permanent failure"),
            Self::Deadline => write!(f, "deadline reached"),
        }
    }
}

/// The retry loop stopped without a success. Always carries the last failure.
#[derive(Debug, Error)]
#[error("{reason} after {attempts} attempt(s) over {elapsed:.1?}: {last}")]
pub struct Exhausted<E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// Time elapsed since the first attempt started.
    pub elapsed: Duration,
    /// Why the loop stopped.
    pub reason: StopReason,
    /// The last observed failure.
    pub last: E,
}

impl<E> Exhausted<E> {
    /// Consumes the error, returning the last observed failure.
    pub fn into_last(self) -> E {
        self.last
    }
}

type Observer<'o, E> = Box<dyn FnMut(&AttemptFailure<'_, E>) + 'o>;
type Classifier<'o, E> = Box<dyn Fn(&E) -> bool + 'o>;

/// A configured retry loop.
///
/// ```rust
/// use std::time::Duration;
/// use dockcheck_retry::{AttemptBudget, Retry, StopReason};
///
/// let budget = AttemptBudget::fixed(5, Duration::ZERO).unwrap();
/// let err = Retry::new(budget)
///     .stop_when(|e: &&'static str| *e == "failed")
///     .run(|| Err::<(), _>("failed"))
///     .unwrap_err();
/// assert_eq!(err.reason, StopReason::Permanent);
/// assert_eq!(err.attempts, 1);
/// ```
pub struct Retry<'o, E> {
    budget: AttemptBudget,
    observer: Option<Observer<'o, E>>,
    permanent: Option<Classifier<'o, E>>,
    deadline: Option<Instant>,
}

impl<'o, E> Retry<'o, E> {
    /// Creates a retry loop governed by `budget`.
    #[must_use]
    pub fn new(budget: AttemptBudget) -> Self {
        Self {
            budget,
            observer: None,
            permanent: None,
            deadline: None,
        }
    }

    /// Invokes `observer` after every failed attempt that will be retried.
    #[must_use]
    pub fn observe(mut self, observer: impl FnMut(&AttemptFailure<'_, E>) + 'o) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Stops immediately when `is_permanent` returns true for a failure.
    #[must_use]
    pub fn stop_when(mut self, is_permanent: impl Fn(&E) -> bool + 'o) -> Self {
        self.permanent = Some(Box::new(is_permanent));
        self
    }

    /// Gives up instead of sleeping past `at`.
    #[must_use]
    pub fn deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(at);
        self
    }

    /// Runs `operation` until it succeeds or the budget is spent.
    ///
    /// A success returns immediately; no further attempts are made.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] wrapping the last failure when every attempt
    /// failed, when a failure was classified as permanent, or when the
    /// next attempt could not start before the deadline.
    pub fn run<T>(mut self, mut operation: impl FnMut() -> Result<T, E>) -> Result<T, Exhausted<E>> {
        let started = Instant::now();
        let max_attempts = self.budget.max_attempts();
        let mut attempt = 1;
        loop {
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let elapsed = started.elapsed();

            let permanent = self.permanent.as_ref().is_some_and(|p| p(&error));
            let delay = self.budget.delay_after(attempt);
            let reason = if permanent {
                Some(StopReason::Permanent)
            } else if attempt >= max_attempts {
                Some(StopReason::BudgetSpent)
            } else if self.deadline.is_some_and(|at| {
                Instant::now().checked_add(delay).is_none_or(|wake| wake >= at)
            }) {
                Some(StopReason::Deadline)
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(Exhausted {
                    attempts: attempt,
                    elapsed,
                    reason,
                    last: error,
                });
            }

            if let Some(observer) = self.observer.as_mut() {
                observer(&AttemptFailure {
                    error: &error,
                    attempt,
                    elapsed,
                });
            }

            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;
        }
    }
}

/// Runs `operation` under `budget`, invoking `on_attempt_failure` after every
/// failed attempt that will be retried.
///
/// # Errors
///
/// Returns [`Exhausted`] wrapping the last failure when all attempts fail.
pub fn retry<T, E>(
    operation: impl FnMut() -> Result<T, E>,
    budget: &AttemptBudget,
    on_attempt_failure: Option<&mut dyn FnMut(&AttemptFailure<'_, E>)>,
) -> Result<T, Exhausted<E>> {
    let mut engine = Retry::new(*budget);
    if let Some(observer) = on_attempt_failure {
        engine = engine.observe(observer);
    }
    engine.run(operation)
}

/// Observer that logs each failed attempt at `warn` level.
pub fn log_failure<E: fmt::Display>(label: &str) -> impl FnMut(&AttemptFailure<'_, E>) + '_ {
    move |failure| {
        tracing::warn!(
            probe = label,
            attempt = failure.attempt,
            elapsed_secs = failure.elapsed.as_secs_f64(),
            error = %failure.error,
            "attempt failed, retrying"
        );
    }
}
