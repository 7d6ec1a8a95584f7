//! The verification run state machine.
//!
//! ```text
//! PROVISION_SERVER -> AWAIT_SERVER_READY -> PROVISION_WORKERS -> SUBMIT_WORK
//!   -> for each worker: ACTIVATE -> DISPATCH -> AWAIT_COMPLETION -> VERIFY
//!   -> TEARDOWN
//! ```
//!
//! Stages run strictly in sequence on the caller's thread. Teardown always
//! runs, whatever stage the run stopped in.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dockcheck_common::config::HarnessConfig;
use dockcheck_common::constants::{LABEL_ROLE, LABEL_RUN};
use dockcheck_common::error::{HarnessError, Result};
use dockcheck_common::types::{ContainerRole, ContainerState, ImageRef, RunId};
use dockcheck_probe::api::ServerApi;
use dockcheck_probe::http::HttpClient;
use dockcheck_probe::probes::{EndpointUp, NodeCount, TerminalState};
use dockcheck_runtime::backend::{ContainerRuntime, ContainerSpec};
use serde::Serialize;
use thiserror::Error;

use crate::budgets::Budgets;
use crate::context::{RunContext, RunPlan, WorkerDescriptor};
use crate::pipeline::PipelineDefinition;
use crate::server::{self, ServerOptions};
use crate::stage::{CancelToken, Checkpoint, Stage};
use crate::teardown::{TeardownGuard, TeardownSummary};

/// Outcome of a run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: RunId,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Total duration, teardown included.
    pub elapsed: Duration,
    /// Number of workers discovered and provisioned.
    pub worker_count: usize,
    /// Every stage entered, in order.
    pub stages: Vec<Stage>,
    /// Hostnames of the workers whose unit of work passed.
    pub verified_workers: Vec<String>,
    /// What teardown released.
    pub teardown: TeardownSummary,
}

/// A run that stopped before verifying every worker.
#[derive(Debug, Error)]
#[error("run failed during {stage}: {error}")]
pub struct RunFailure {
    /// Last stage entered before the failure.
    pub stage: Stage,
    /// What went wrong.
    #[source]
    pub error: HarnessError,
    /// Progress made up to the failure, teardown included.
    pub report: RunReport,
}

/// Drives verification runs against one runtime and one HTTP client.
pub struct Workflow<'a> {
    runtime: &'a dyn ContainerRuntime,
    http: &'a dyn HttpClient,
    config: &'a HarnessConfig,
    budgets: Budgets,
    cancel: CancelToken,
}

impl<'a> Workflow<'a> {
    /// Creates a workflow.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the configuration is invalid.
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        http: &'a dyn HttpClient,
        config: &'a HarnessConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runtime,
            http,
            config,
            budgets: Budgets::from_config(&config.budgets)?,
            cancel: CancelToken::new(),
        })
    }

    /// Stops runs at the next stage boundary once `cancel` is triggered.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Discovers images and plans a run of the default unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if no server image is available.
    pub fn plan(&self) -> Result<RunPlan> {
        self.plan_with(PipelineDefinition::default())
    }

    /// Discovers images and plans a run of `work`.
    ///
    /// # Errors
    ///
    /// Returns an error if no server image is available.
    pub fn plan_with(&self, work: PipelineDefinition) -> Result<RunPlan> {
        RunPlan::discover(self.runtime, self.config, work)
    }

    /// Executes `plan`, then tears down everything it created.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error together with the stage it happened
    /// in and a report of the progress made. Teardown has already run.
    pub fn run(&self, plan: RunPlan) -> std::result::Result<RunReport, Box<RunFailure>> {
        let started_at = Utc::now();
        let run_id = plan.run_id.clone();
        let server_image = plan.server_image.clone();
        let worker_count = plan.workers.len();
        let span = tracing::info_span!("run", run = %run_id);
        let _entered = span.enter();
        tracing::info!(server = %server_image, workers = worker_count, "starting run");

        let mut checkpoint = Checkpoint::new(self.cancel.clone(), self.config.deadline());
        let mut verified = Vec::new();
        let mut guard = TeardownGuard::new(self.runtime, RunContext::from_plan(plan));

        let outcome = self.drive(&mut guard, &server_image, &mut checkpoint, &mut verified);

        let failed_in = checkpoint.current().unwrap_or(Stage::ProvisionServer);
        checkpoint.force(Stage::Teardown);
        let teardown = guard.finish();
        let report = RunReport {
            run_id,
            started_at,
            elapsed: checkpoint.elapsed(),
            worker_count,
            stages: checkpoint.into_stages(),
            verified_workers: verified,
            teardown,
        };

        match outcome {
            Ok(()) => {
                if !report.teardown.is_clean() {
                    tracing::warn!(
                        leaked = report.teardown.errors.len(),
                        "run passed but teardown left resources behind"
                    );
                }
                tracing::info!(
                    verified = report.verified_workers.len(),
                    elapsed = ?report.elapsed,
                    "run passed"
                );
                Ok(report)
            }
            Err(error) => {
                tracing::error!(stage = %failed_in, error = %error, "run failed");
                Err(Box::new(RunFailure {
                    stage: failed_in,
                    error,
                    report,
                }))
            }
        }
    }

    fn drive(
        &self,
        ctx: &mut RunContext,
        server_image: &ImageRef,
        checkpoint: &mut Checkpoint,
        verified: &mut Vec<String>,
    ) -> Result<()> {
        checkpoint.enter(Stage::ProvisionServer)?;
        let server = server::provision(
            self.runtime,
            ctx,
            server_image,
            &self.config.server,
            &ServerOptions::full(),
        )?;

        checkpoint.enter(Stage::AwaitServerReady)?;
        checkpoint.await_ready(
            &EndpointUp::new(self.http, &server.endpoint.management_url),
            &self.budgets.endpoint_up,
        )?;

        checkpoint.enter(Stage::ProvisionWorkers)?;
        self.provision_workers(ctx, &server.endpoint.worker_url)?;

        checkpoint.enter(Stage::SubmitWork)?;
        let api = ServerApi::new(self.http, &server.endpoint.management_url);
        let work = ctx.work().clone();
        let submission = api.create_pipeline(&work)?;
        tracing::info!(pipeline = work.name(), ?submission, "unit of work submitted");

        let workers = ctx.workers().to_vec();
        if workers.is_empty() {
            // Nothing to activate: whatever agents the server already has run the work.
            return self.dispatch_and_await(&api, &work, 0, checkpoint);
        }
        for worker in &workers {
            self.verify_worker(ctx, &api, &work, worker, checkpoint)
                .map_err(|e| attribute(e, worker))?;
            verified.push(worker.hostname.clone());
        }
        Ok(())
    }

    fn provision_workers(&self, ctx: &mut RunContext, server_url: &str) -> Result<()> {
        let workers = ctx.workers().to_vec();
        for worker in &workers {
            let name = ctx.container_name(&worker.hostname);
            let spec = ContainerSpec::new(name, worker.image.clone())
                .env(worker.env(server_url))
                .label(LABEL_RUN, ctx.run_id().as_str())
                .label(LABEL_ROLE, ContainerRole::Worker.to_string());
            let id = self.runtime.create(&spec).map_err(|e| match e {
                HarnessError::Provisioning { message, .. } => {
                    HarnessError::provisioning(format!("worker {}", worker.hostname), message)
                }
                other => other,
            })?;
            tracing::info!(
                worker = %worker.hostname,
                container = %id,
                image = %worker.image,
                "worker created"
            );
            ctx.track(id, ContainerRole::Worker, &worker.hostname);
        }
        Ok(())
    }

    fn verify_worker(
        &self,
        ctx: &mut RunContext,
        api: &ServerApi<'_>,
        work: &PipelineDefinition,
        worker: &WorkerDescriptor,
        checkpoint: &mut Checkpoint,
    ) -> Result<()> {
        let index = worker.index;
        checkpoint.enter(Stage::Activate(index))?;
        let id = ctx
            .container_for(&worker.hostname)
            .map(|c| c.id.clone())
            .ok_or_else(|| HarnessError::NotFound {
                kind: "worker container",
                id: worker.hostname.clone(),
            })?;
        self.runtime.start(&id)?;
        ctx.mark(&id, ContainerState::Running);
        tracing::info!(worker = %worker.hostname, container = %id, "worker started");
        if self.config.workers.await_registration {
            // Registrations outlive retired containers, so the count only grows.
            checkpoint.await_ready(&NodeCount::new(api, index + 1), &self.budgets.node_count)?;
        }

        self.dispatch_and_await(api, work, index, checkpoint)?;

        checkpoint.enter(Stage::Verify(index))?;
        self.runtime.stop(&id)?;
        ctx.mark(&id, ContainerState::Stopped);
        self.runtime.remove(&id)?;
        ctx.mark(&id, ContainerState::Removed);
        tracing::info!(worker = %worker.hostname, "worker verified and retired");
        Ok(())
    }

    fn dispatch_and_await(
        &self,
        api: &ServerApi<'_>,
        work: &PipelineDefinition,
        index: usize,
        checkpoint: &mut Checkpoint,
    ) -> Result<()> {
        checkpoint.enter(Stage::Dispatch(index))?;
        let _ = api.unpause(work.name())?;
        let _ = api.schedule(work.name())?;

        checkpoint.enter(Stage::AwaitCompletion(index))?;
        let counter = u32::try_from(index + 1).map_err(|_| HarnessError::Config {
            message: format!("worker index {index} out of range"),
        })?;
        let instance = work.instance(counter).ok_or_else(|| HarnessError::Config {
            message: format!("pipeline '{}' defines no stage", work.name()),
        })?;
        checkpoint.await_ready(
            &TerminalState::new(api, instance, self.config.fail_fast),
            &self.budgets.terminal_state,
        )
    }
}

/// Attributes a failed wait inside the per-worker loop to its worker.
fn attribute(error: HarnessError, worker: &WorkerDescriptor) -> HarnessError {
    match error {
        e @ (HarnessError::Exhaustion { .. } | HarnessError::TerminalFailure { .. }) => {
            HarnessError::Verification {
                worker: worker.hostname.clone(),
                source: Box::new(e),
            }
        }
        other => other,
    }
}
