//! Guaranteed release of every resource a run created.
//!
//! [`TeardownGuard`] owns the [`RunContext`] for the lifetime of a run.
//! Calling [`TeardownGuard::finish`] tears down explicitly and returns a
//! summary; if the guard is dropped first (early return, panic unwinding)
//! the same teardown runs from `Drop`.

use std::ops::{Deref, DerefMut};

use dockcheck_common::types::ContainerState;
use dockcheck_runtime::backend::ContainerRuntime;
use serde::Serialize;

use crate::context::RunContext;

/// What teardown released and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownSummary {
    /// Labels of the containers removed, in removal order.
    pub removed: Vec<String>,
    /// Number of staged host directories deleted.
    pub staged_dirs_removed: usize,
    /// Failures encountered while releasing resources.
    pub errors: Vec<String>,
}

impl TeardownSummary {
    /// Whether every resource was released.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Stops and removes every outstanding container, newest first, then
/// deletes staged directories.
///
/// Failures are collected rather than returned so one stuck resource does
/// not keep the others alive.
pub fn release(runtime: &dyn ContainerRuntime, ctx: &mut RunContext) -> TeardownSummary {
    let mut summary = TeardownSummary::default();
    let outstanding: Vec<_> = ctx.outstanding().cloned().collect();

    for container in outstanding.iter().rev() {
        if container.state == ContainerState::Running {
            if let Err(e) = runtime.stop(&container.id) {
                tracing::warn!(container = %container, error = %e, "failed to stop container");
                summary.errors.push(format!("stop {container}: {e}"));
            } else {
                ctx.mark(&container.id, ContainerState::Stopped);
            }
        }
        match runtime.remove(&container.id) {
            Ok(()) => {
                tracing::info!(container = %container, "removed container");
                ctx.mark(&container.id, ContainerState::Removed);
                summary.removed.push(container.label.clone());
            }
            Err(e) => {
                tracing::warn!(container = %container, error = %e, "failed to remove container");
                summary.errors.push(format!("remove {container}: {e}"));
            }
        }
    }

    for dir in ctx.take_staged() {
        let path = dir.path().display().to_string();
        match dir.close() {
            Ok(()) => summary.staged_dirs_removed += 1,
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to delete staged directory");
                summary.errors.push(format!("delete {path}: {e}"));
            }
        }
    }

    summary
}

/// Owns a [`RunContext`] and releases its resources exactly once.
pub struct TeardownGuard<'r> {
    runtime: &'r dyn ContainerRuntime,
    context: RunContext,
    released: bool,
}

impl<'r> TeardownGuard<'r> {
    /// Guards `context`, releasing its resources through `runtime`.
    #[must_use]
    pub fn new(runtime: &'r dyn ContainerRuntime, context: RunContext) -> Self {
        Self {
            runtime,
            context,
            released: false,
        }
    }

    /// Tears down now and returns what was released.
    #[must_use]
    pub fn finish(mut self) -> TeardownSummary {
        self.released = true;
        release(self.runtime, &mut self.context)
    }
}

impl Deref for TeardownGuard<'_> {
    type Target = RunContext;

    fn deref(&self) -> &RunContext {
        &self.context
    }
}

impl DerefMut for TeardownGuard<'_> {
    fn deref_mut(&mut self) -> &mut RunContext {
        &mut self.context
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let summary = release(self.runtime, &mut self.context);
            tracing::warn!(
                run = %self.context.run_id(),
                removed = summary.removed.len(),
                errors = summary.errors.len(),
                "run context dropped without explicit teardown"
            );
        }
    }
}
