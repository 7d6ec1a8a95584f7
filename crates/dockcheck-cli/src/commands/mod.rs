//! CLI command definitions and dispatch.

pub mod check_server;
pub mod images;
pub mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dockcheck_common::config::{HarnessConfig, read_version_key};
use dockcheck_probe::http::ReqwestClient;
use dockcheck_runtime::backend::docker::DockerCli;

/// Per-request timeout of the management API client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// dockcheck: end-to-end verification of server and worker images.
#[derive(Parser, Debug)]
#[command(name = "dockcheck", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// YAML configuration file.
    #[arg(long, global = true, env = "DOCKCHECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// JSON file mapping version keys to image tags.
    #[arg(long, global = true, env = "VERSION_FILE_LOCATION", default_value = "version.json")]
    pub version_file: PathBuf,

    /// Key of the version file whose value pins the image tags.
    #[arg(long, global = true)]
    pub version_key: Option<String>,

    /// Docker client binary (defaults to `docker` on PATH).
    #[arg(long, global = true)]
    pub docker: Option<PathBuf>,
}

/// Format of log records written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per record.
    Json,
}

/// Configuration overrides accepted by commands that start containers.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Host the server's published ports are reached on.
    #[arg(long)]
    pub host: Option<String>,

    /// Abort the run once this many seconds have passed.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Keep polling a stage that already reported a terminal failure.
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Directory copied into the server's data volume.
    #[arg(long)]
    pub fixture_dir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full server and worker verification.
    Run(run::RunArgs),
    /// Run assertion checks against the server image alone.
    CheckServer(check_server::CheckServerArgs),
    /// List the server and worker images a run would use.
    Images,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(&cli.global, args),
        Command::CheckServer(args) => check_server::execute(&cli.global, args),
        Command::Images => images::execute(&cli.global),
    }
}

/// Builds the effective configuration: file (or defaults), then the
/// version pin, then command-line overrides.
///
/// # Errors
///
/// Returns an error if the file or version key cannot be read, or the
/// result is invalid.
pub fn resolve_config(global: &GlobalArgs, overrides: &Overrides) -> anyhow::Result<HarnessConfig> {
    let mut config = match &global.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    if let Some(key) = &global.version_key {
        let tag = read_version_key(&global.version_file, key).with_context(|| {
            format!("reading '{key}' from {}", global.version_file.display())
        })?;
        pin_tag(&mut config, &tag);
    }
    apply(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

/// Restricts both image filters to `tag`.
fn pin_tag(config: &mut HarnessConfig, tag: &str) {
    config.server.image_filter = format!("{}:{tag}", config.server.image_filter);
    config.workers.image_filter = format!("{}:{tag}", config.workers.image_filter);
    tracing::debug!(
        server = %config.server.image_filter,
        workers = %config.workers.image_filter,
        "pinned image tags"
    );
}

fn apply(config: &mut HarnessConfig, overrides: &Overrides) {
    if let Some(host) = &overrides.host {
        config.server.host.clone_from(host);
    }
    if overrides.deadline_secs.is_some() {
        config.deadline_secs = overrides.deadline_secs;
    }
    if overrides.no_fail_fast {
        config.fail_fast = false;
    }
    if let Some(dir) = &overrides.fixture_dir {
        config.server.fixture_dir = Some(dir.clone());
    }
}

/// The Docker backend, from `--docker` or `PATH`.
///
/// # Errors
///
/// Returns an error if no `docker` binary can be found.
pub fn docker(global: &GlobalArgs) -> anyhow::Result<DockerCli> {
    match &global.docker {
        Some(path) => Ok(DockerCli::with_binary(path.clone())),
        None => Ok(DockerCli::locate()?),
    }
}

/// The HTTP client used for the management API.
///
/// # Errors
///
/// Returns an error if the client cannot be initialised.
pub fn http_client() -> anyhow::Result<ReqwestClient> {
    Ok(ReqwestClient::new(HTTP_TIMEOUT)?)
}
