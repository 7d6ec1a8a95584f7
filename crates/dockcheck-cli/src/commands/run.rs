//! `dockcheck run`: Verify the server and every worker image end to end.

use std::path::PathBuf;

use clap::Args;
use dockcheck_harness::pipeline::PipelineDefinition;
use dockcheck_harness::stage::CancelToken;
use dockcheck_harness::workflow::{RunReport, Workflow};

use super::{GlobalArgs, Overrides, docker, http_client, resolve_config};
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration overrides.
    #[command(flatten)]
    pub overrides: Overrides,

    /// JSON pipeline definition to run instead of the default one.
    #[arg(long)]
    pub pipeline: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `run` command.
///
/// Ctrl-C stops the run at the next stage boundary; teardown still runs.
///
/// # Errors
///
/// Returns an error if setup fails, the run does not verify every
/// worker, or teardown leaves anything behind.
pub fn execute(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    output::print_header();
    let config = resolve_config(global, &args.overrides)?;
    let runtime = docker(global)?;
    let http = http_client()?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping after the current stage");
        handler_token.cancel();
    })?;

    let workflow = Workflow::new(&runtime, &http, &config)?.with_cancel(cancel);
    let work = match &args.pipeline {
        Some(path) => PipelineDefinition::load(path)?,
        None => PipelineDefinition::default(),
    };
    let plan = workflow.plan_with(work)?;
    output::print_plan(&plan);

    match workflow.run(plan) {
        Ok(report) => {
            output::print_report(&report);
            if args.json {
                output::print_json(&report)?;
            }
            conclude(&report)
        }
        Err(failure) => {
            output::print_failure(&failure);
            if args.json {
                output::print_json(&failure.report)?;
            }
            Err(failure.into())
        }
    }
}

/// A passing run still fails the command if teardown leaked resources.
fn conclude(report: &RunReport) -> anyhow::Result<()> {
    let leaked = report.teardown.errors.len();
    if leaked > 0 {
        anyhow::bail!("run passed but teardown left {leaked} resource(s) behind");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dockcheck_common::types::RunId;
    use dockcheck_harness::teardown::TeardownSummary;

    use super::*;

    fn report(teardown: TeardownSummary) -> RunReport {
        RunReport {
            run_id: RunId::new("abcd1234"),
            started_at: Default::default(),
            elapsed: Duration::from_secs(3),
            worker_count: 1,
            stages: Vec::new(),
            verified_workers: vec!["host-0".into()],
            teardown,
        }
    }

    #[test]
    fn clean_teardown_concludes_ok() {
        let summary = TeardownSummary {
            removed: vec!["host-0".into(), "server".into()],
            ..TeardownSummary::default()
        };
        assert!(conclude(&report(summary)).is_ok());
    }

    #[test]
    fn leaked_container_fails_the_command() {
        let summary = TeardownSummary {
            removed: vec!["host-0".into()],
            errors: vec!["remove server: daemon unavailable".into()],
            ..TeardownSummary::default()
        };
        let err = conclude(&report(summary)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "run passed but teardown left 1 resource(s) behind"
        );
    }
}
