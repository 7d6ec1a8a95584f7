//! Readiness probes.
//!
//! A probe performs one check and reports [`Readiness`]. Not being ready
//! is the expected state before convergence and is not an error by itself;
//! [`await_ready`] turns it into a retryable failure and runs the probe
//! through the retry engine under the probe's own budget.

use std::time::Instant;

use dockcheck_common::constants::{RESULT_PASSED, TERMINAL_FAILURE_RESULTS};
use dockcheck_common::error::HarnessError;
use dockcheck_retry::{AttemptBudget, Retry, StopReason, log_failure};
use thiserror::Error;

use crate::api::{ServerApi, StageInstance};
use crate::http::HttpClient;

/// Outcome of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The awaited state has been reached.
    Ready,
    /// Not there yet, with a reason for diagnostics.
    NotReady(String),
}

/// A failed readiness check.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The check completed but the state is not acceptable yet.
    #[error("not ready: {0}")]
    NotReady(String),
    /// The check could not be completed (connection refused, bad status, ...).
    #[error(transparent)]
    Transport(#[from] HarnessError),
    /// The awaited state can no longer be reached.
    #[error("terminal failure: {0}")]
    TerminalFailure(String),
}

impl ProbeError {
    /// Whether retrying cannot change the outcome.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::TerminalFailure(_))
    }
}

/// A readiness check with a fixed acceptance predicate.
pub trait Probe {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Performs one check.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Transport`] when the check could not be made,
    /// or [`ProbeError::TerminalFailure`] when it never will succeed.
    fn check(&self) -> Result<Readiness, ProbeError>;
}

/// Retries `probe` until it reports [`Readiness::Ready`].
///
/// Every failed attempt except the last is logged at `warn`. Permanent
/// failures stop the loop early.
///
/// # Errors
///
/// Returns [`HarnessError::Exhaustion`] carrying the last failure when the
/// budget is spent, or [`HarnessError::TerminalFailure`] when a permanent
/// failure is seen.
pub fn await_ready(probe: &dyn Probe, budget: &AttemptBudget) -> Result<(), HarnessError> {
    await_ready_until(probe, budget, None)
}

/// Like [`await_ready`], but gives up rather than sleep past `deadline`.
///
/// # Errors
///
/// As [`await_ready`], plus [`HarnessError::Aborted`] (with the probe name
/// as the stage) when the next attempt could not start before `deadline`.
pub fn await_ready_until(
    probe: &dyn Probe,
    budget: &AttemptBudget,
    deadline: Option<Instant>,
) -> Result<(), HarnessError> {
    let name = probe.name();
    tracing::info!(
        probe = name,
        max_attempts = budget.max_attempts(),
        delay_ms = u64::try_from(budget.base_delay().as_millis()).unwrap_or(u64::MAX),
        "awaiting readiness"
    );
    let mut retry = Retry::new(*budget)
        .observe(log_failure(name))
        .stop_when(ProbeError::is_permanent);
    if let Some(at) = deadline {
        retry = retry.deadline(at);
    }
    retry
        .run(|| match probe.check()? {
            Readiness::Ready => Ok(()),
            Readiness::NotReady(reason) => Err(ProbeError::NotReady(reason)),
        })
        .map(|()| tracing::info!(probe = name, "ready"))
        .map_err(|exhausted| match exhausted.reason {
            StopReason::BudgetSpent => HarnessError::Exhaustion {
                probe: name.to_string(),
                attempts: exhausted.attempts,
                elapsed: exhausted.elapsed,
                last: Box::new(exhausted.last),
            },
            StopReason::Permanent => HarnessError::TerminalFailure {
                probe: name.to_string(),
                attempts: exhausted.attempts,
                elapsed: exhausted.elapsed,
                last: Box::new(exhausted.last),
            },
            StopReason::Deadline => HarnessError::Aborted {
                stage: name.to_string(),
                reason: format!(
                    "deadline reached after {} attempt(s) over {:.1?}: {}",
                    exhausted.attempts, exhausted.elapsed, exhausted.last
                ),
            },
        })
}

/// Ready when a `GET` against a URL answers with a 2xx status.
pub struct EndpointUp<'h> {
    http: &'h dyn HttpClient,
    url: String,
}

impl<'h> EndpointUp<'h> {
    /// Probes `url`.
    #[must_use]
    pub fn new(http: &'h dyn HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

impl Probe for EndpointUp<'_> {
    fn name(&self) -> &str {
        "endpoint-up"
    }

    fn check(&self) -> Result<Readiness, ProbeError> {
        let response = self.http.get(&self.url, &[])?;
        if response.is_success() {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::NotReady(format!(
                "{} answered HTTP {}",
                self.url, response.status
            )))
        }
    }
}

/// Ready once the server serves the configuration of a named pipeline.
pub struct PipelineServed<'a> {
    api: &'a ServerApi<'a>,
    pipeline: String,
}

impl<'a> PipelineServed<'a> {
    /// Awaits the configuration of `pipeline`.
    #[must_use]
    pub fn new(api: &'a ServerApi<'a>, pipeline: impl Into<String>) -> Self {
        Self {
            api,
            pipeline: pipeline.into(),
        }
    }
}

impl Probe for PipelineServed<'_> {
    fn name(&self) -> &str {
        "pipeline-served"
    }

    fn check(&self) -> Result<Readiness, ProbeError> {
        let _ = self.api.pipeline_config(&self.pipeline)?;
        Ok(Readiness::Ready)
    }
}

/// Ready when the server lists exactly `expected` workers.
pub struct NodeCount<'a> {
    api: &'a ServerApi<'a>,
    expected: usize,
}

impl<'a> NodeCount<'a> {
    /// Awaits `expected` registered workers.
    ///
    /// `expected` must come from the number of workers actually
    /// provisioned.
    #[must_use]
    pub const fn new(api: &'a ServerApi<'a>, expected: usize) -> Self {
        Self { api, expected }
    }

    /// The worker count this probe waits for.
    #[must_use]
    pub const fn expected(&self) -> usize {
        self.expected
    }
}

impl Probe for NodeCount<'_> {
    fn name(&self) -> &str {
        "node-count"
    }

    fn check(&self) -> Result<Readiness, ProbeError> {
        let agents = self.api.agents()?;
        let registered = agents.len();
        tracing::debug!(
            hostnames = ?agents.iter().map(|a| a.hostname.as_str()).collect::<Vec<_>>(),
            "registered workers"
        );
        if registered == self.expected {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::NotReady(format!(
                "{registered} of {} workers registered",
                self.expected
            )))
        }
    }
}

/// Ready when a stage instance reports the passed result.
pub struct TerminalState<'a> {
    api: &'a ServerApi<'a>,
    instance: StageInstance,
    fail_fast: bool,
}

impl<'a> TerminalState<'a> {
    /// Awaits a passing result for `instance`.
    ///
    /// With `fail_fast`, a recognized terminal failure result stops the
    /// wait; otherwise it is retried like a running stage.
    #[must_use]
    pub const fn new(api: &'a ServerApi<'a>, instance: StageInstance, fail_fast: bool) -> Self {
        Self {
            api,
            instance,
            fail_fast,
        }
    }
}

impl Probe for TerminalState<'_> {
    fn name(&self) -> &str {
        "terminal-state"
    }

    fn check(&self) -> Result<Readiness, ProbeError> {
        let result = self.api.stage_result(&self.instance)?;
        match result.as_deref() {
            Some(RESULT_PASSED) => Ok(Readiness::Ready),
            Some(other) if self.fail_fast && TERMINAL_FAILURE_RESULTS.contains(&other) => Err(
                ProbeError::TerminalFailure(format!("{} reported {other}", self.instance)),
            ),
            Some(other) => Ok(Readiness::NotReady(format!(
                "{} reported {other}",
                self.instance
            ))),
            None => Ok(Readiness::NotReady(format!(
                "{} has no result yet",
                self.instance
            ))),
        }
    }
}
