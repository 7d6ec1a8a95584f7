//! `dockcheck images`: List the images a run would exercise.

use dockcheck_runtime::discovery;

use super::{GlobalArgs, Overrides, docker, resolve_config};

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the runtime cannot list images or no server image
/// is present.
#[allow(clippy::print_stdout)]
pub fn execute(global: &GlobalArgs) -> anyhow::Result<()> {
    let config = resolve_config(global, &Overrides::default())?;
    let runtime = docker(global)?;
    let images = discovery::discover(
        &runtime,
        &config.server.image_filter,
        &config.workers.image_filter,
    )?;

    println!("ROLE\tIMAGE ID\tTAGS");
    println!("server\t{}\t{}", images.server.id, images.server.repo_tags.join(","));
    for (index, worker) in images.workers.iter().enumerate() {
        println!("host-{index}\t{}\t{}", worker.id, worker.repo_tags.join(","));
    }
    Ok(())
}
