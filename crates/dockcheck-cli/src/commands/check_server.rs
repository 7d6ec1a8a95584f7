//! `dockcheck check-server`: Assertion checks against the server image.

use clap::Args;
use dockcheck_harness::checks::ServerChecks;
use dockcheck_runtime::discovery;

use super::{GlobalArgs, Overrides, docker, http_client, resolve_config};
use crate::output;

/// Arguments for the `check-server` command.
#[derive(Args, Debug)]
pub struct CheckServerArgs {
    /// Configuration overrides.
    #[command(flatten)]
    pub overrides: Overrides,

    /// Pipeline the fixture configuration defines.
    #[arg(long)]
    pub fixture_pipeline: Option<String>,

    /// Plugin id the server must have loaded (repeatable).
    #[arg(long = "plugin")]
    pub plugins: Vec<String>,
}

/// Executes the `check-server` command.
///
/// # Errors
///
/// Returns an error if no server image is found or a check fails.
pub fn execute(global: &GlobalArgs, args: CheckServerArgs) -> anyhow::Result<()> {
    output::print_header();
    let mut config = resolve_config(global, &args.overrides)?;
    if args.fixture_pipeline.is_some() {
        config.server.fixture_pipeline = args.fixture_pipeline;
    }
    config.expected_plugins.extend(args.plugins);

    let runtime = docker(global)?;
    let http = http_client()?;
    let images = discovery::discover(
        &runtime,
        &config.server.image_filter,
        &config.workers.image_filter,
    )?;
    tracing::info!(image = %images.server.id, "checking server image");

    let outcomes = ServerChecks::new(&runtime, &http, &config)?.run_all(&images.server.id)?;
    output::print_checks(&outcomes);
    Ok(())
}
