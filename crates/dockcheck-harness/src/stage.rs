//! Workflow stages and the checkpoint guarding every stage boundary.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dockcheck_common::error::{HarnessError, Result};
use dockcheck_probe::probes::{Probe, await_ready_until};
use dockcheck_retry::AttemptBudget;
use serde::Serialize;

/// A stage of a verification run.
///
/// Per-worker stages carry the worker's position in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "worker", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Create and start the server container.
    ProvisionServer,
    /// Wait for the server endpoint to answer.
    AwaitServerReady,
    /// Create one container per worker descriptor.
    ProvisionWorkers,
    /// Register the unit of work with the server.
    SubmitWork,
    /// Start a worker and wait for it to register.
    Activate(usize),
    /// Trigger a run of the unit of work.
    Dispatch(usize),
    /// Wait for that run to pass.
    AwaitCompletion(usize),
    /// Retire the verified worker.
    Verify(usize),
    /// Release every resource of the run.
    Teardown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProvisionServer => write!(f, "PROVISION_SERVER"),
            Self::AwaitServerReady => write!(f, "AWAIT_SERVER_READY"),
            Self::ProvisionWorkers => write!(f, "PROVISION_WORKERS"),
            Self::SubmitWork => write!(f, "SUBMIT_WORK"),
            Self::Activate(i) => write!(f, "ACTIVATE[{i}]"),
            Self::Dispatch(i) => write!(f, "DISPATCH[{i}]"),
            Self::AwaitCompletion(i) => write!(f, "AWAIT_COMPLETION[{i}]"),
            Self::Verify(i) => write!(f, "VERIFY[{i}]"),
            Self::Teardown => write!(f, "TEARDOWN"),
        }
    }
}

/// Shared flag requesting that a run stop at its next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records stage transitions and refuses to enter a stage once the run is
/// cancelled or past its deadline.
#[derive(Debug)]
pub struct Checkpoint {
    cancel: CancelToken,
    started: Instant,
    deadline: Option<Duration>,
    entered: Vec<Stage>,
}

impl Checkpoint {
    /// Starts the clock for a run.
    #[must_use]
    pub fn new(cancel: CancelToken, deadline: Option<Duration>) -> Self {
        Self {
            cancel,
            started: Instant::now(),
            deadline,
            entered: Vec::new(),
        }
    }

    /// Enters `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Aborted`] if cancellation was requested or
    /// the deadline has passed. The stage is not recorded in that case.
    pub fn enter(&mut self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(HarnessError::Aborted {
                stage: stage.to_string(),
                reason: "cancelled".into(),
            });
        }
        if let Some(deadline) = self.deadline {
            let elapsed = self.started.elapsed();
            if elapsed > deadline {
                return Err(HarnessError::Aborted {
                    stage: stage.to_string(),
                    reason: format!("deadline of {deadline:?} exceeded after {elapsed:.1?}"),
                });
            }
        }
        tracing::info!(stage = %stage, "entering stage");
        self.entered.push(stage);
        Ok(())
    }

    /// Records `stage` without checking for cancellation.
    pub fn force(&mut self, stage: Stage) {
        tracing::info!(stage = %stage, "entering stage");
        self.entered.push(stage);
    }

    /// The most recently entered stage.
    #[must_use]
    pub fn current(&self) -> Option<Stage> {
        self.entered.last().copied()
    }

    /// The instant the run must be done by, if it has a deadline.
    #[must_use]
    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline.and_then(|d| self.started.checked_add(d))
    }

    /// Waits for `probe` inside the current stage, giving up at the run
    /// deadline instead of sleeping through it.
    ///
    /// # Errors
    ///
    /// Whatever the probe wait returns. A deadline stop becomes
    /// [`HarnessError::Aborted`] attributed to the current stage.
    pub fn await_ready(&self, probe: &dyn Probe, budget: &AttemptBudget) -> Result<()> {
        await_ready_until(probe, budget, self.deadline_at()).map_err(|err| match err {
            HarnessError::Aborted { stage: waiting, reason } => HarnessError::Aborted {
                stage: self
                    .current()
                    .map_or_else(|| waiting.clone(), |s| s.to_string()),
                reason: format!("{waiting}: {reason}"),
            },
            other => other,
        })
    }

    /// Time since the run started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Consumes the checkpoint, returning every stage entered in order.
    #[must_use]
    pub fn into_stages(self) -> Vec<Stage> {
        self.entered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_stage_names() {
        assert_eq!(Stage::AwaitServerReady.to_string(), "AWAIT_SERVER_READY");
        assert_eq!(Stage::AwaitCompletion(2).to_string(), "AWAIT_COMPLETION[2]");
    }

    #[test]
    fn cancelled_checkpoint_refuses_next_stage() {
        let token = CancelToken::new();
        let mut checkpoint = Checkpoint::new(token.clone(), None);
        checkpoint.enter(Stage::ProvisionServer).unwrap();
        token.cancel();
        let err = checkpoint.enter(Stage::AwaitServerReady).unwrap_err();
        assert!(matches!(err, HarnessError::Aborted { ref stage, .. } if stage == "AWAIT_SERVER_READY"));
        assert_eq!(checkpoint.current(), Some(Stage::ProvisionServer));
    }

    #[test]
    fn expired_deadline_aborts() {
        let mut checkpoint = Checkpoint::new(CancelToken::new(), Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert!(checkpoint.enter(Stage::ProvisionServer).is_err());
        assert!(checkpoint.into_stages().is_empty());
    }

    #[test]
    fn deadline_at_is_offset_from_start() {
        let checkpoint = Checkpoint::new(CancelToken::new(), Some(Duration::from_secs(5)));
        let at = checkpoint.deadline_at().unwrap();
        assert!(at > Instant::now() + Duration::from_secs(4));
        assert!(Checkpoint::new(CancelToken::new(), None).deadline_at().is_none());
    }
}
