//! Retry/backoff engine for waiting on asynchronous external state.
//!
//! An operation is invoked repeatedly until it succeeds or its
//! [`AttemptBudget`] is spent. Every failure counts the same way, whether
//! the operation hit a transport error or returned a result that is not
//! acceptable yet. The engine blocks the calling thread for the full
//! sleep-and-retry duration and holds no state between calls.
//!
//! ```rust
//! use std::time::Duration;
//! use dockcheck_retry::{retry, AttemptBudget};
//!
//! let budget = AttemptBudget::fixed(3, Duration::from_millis(1)).unwrap();
//! let mut calls = 0;
//! let value = retry(
//!     || {
//!         calls += 1;
//!         if calls < 2 { Err("not yet") } else { Ok(calls) }
//!     },
//!     &budget,
//!     None,
//! )
//! .unwrap();
//! assert_eq!(value, 2);
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod budget;
pub mod engine;

pub use budget::{AttemptBudget, BudgetError};
pub use engine::{AttemptFailure, Exhausted, Retry, StopReason, log_failure, retry};
