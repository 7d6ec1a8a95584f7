//! Discovers the server and worker images a run will exercise.

use dockcheck_common::error::{HarnessError, Result};

use crate::backend::{ContainerRuntime, ImageInfo};

/// Images selected for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImages {
    /// The server image.
    pub server: ImageInfo,
    /// Worker images, in the order the runtime listed them.
    pub workers: Vec<ImageInfo>,
}

/// Selects images by repo-tag fragment.
///
/// The server is the first image tagged with `server_filter`; every image
/// tagged with `worker_filter` becomes a worker. An image matching both
/// filters is only used as the server.
///
/// # Errors
///
/// Returns a provisioning error if no server image is present, or any
/// error from listing images.
pub fn discover(
    runtime: &dyn ContainerRuntime,
    server_filter: &str,
    worker_filter: &str,
) -> Result<DiscoveredImages> {
    let images = runtime.list_images()?;
    let server = images
        .iter()
        .find(|i| i.tagged_with(server_filter))
        .cloned()
        .ok_or_else(|| {
            HarnessError::provisioning("server", format!("no local image tagged '{server_filter}'"))
        })?;
    let workers: Vec<ImageInfo> = images
        .into_iter()
        .filter(|i| i.id != server.id && i.tagged_with(worker_filter))
        .collect();
    tracing::info!(
        server = %server.id,
        workers = workers.len(),
        "discovered images"
    );
    Ok(DiscoveredImages { server, workers })
}
