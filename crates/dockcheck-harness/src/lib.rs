//! # dockcheck-harness
//!
//! Verifies that a server and a variable number of worker containers reach
//! and keep a correct operational state.
//!
//! - [`workflow::Workflow`]: the run state machine, from provisioning the
//!   server to tearing everything down.
//! - [`context::RunContext`] and [`teardown::TeardownGuard`]: the resources
//!   a run owns and the guarantee that they are released.
//! - [`pipeline::PipelineDefinition`]: the unit of work submitted to the server.
//! - [`checks::ServerChecks`]: assertion-style checks of a lone server container.
//!
//! # Example
//!
//! ```rust,no_run
//! use dockcheck_common::config::HarnessConfig;
//! use dockcheck_harness::workflow::Workflow;
//! use dockcheck_probe::http::ReqwestClient;
//! use dockcheck_runtime::backend::docker::DockerCli;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::default();
//! let runtime = DockerCli::locate()?;
//! let http = ReqwestClient::new(std::time::Duration::from_secs(10))?;
//! let workflow = Workflow::new(&runtime, &http, &config)?;
//! let plan = workflow.plan()?;
//! let report = workflow.run(plan)?;
//! println!("verified {} worker(s)", report.verified_workers.len());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod budgets;
pub mod checks;
pub mod context;
pub mod pipeline;
pub mod server;
pub mod stage;
pub mod staging;
pub mod teardown;
pub mod workflow;
