//! Per-run state: the plan derived from discovery and the resources created
//! while executing it.

use std::fmt;

use dockcheck_common::config::HarnessConfig;
use dockcheck_common::constants::{
    APP_NAME, ENV_REGISTER_HOSTNAME, ENV_REGISTER_KEY, ENV_REGISTER_RESOURCES, ENV_SERVER_URL,
};
use dockcheck_common::error::Result;
use dockcheck_common::types::{
    ContainerId, ContainerRole, ContainerState, EnvBindings, ImageRef, RunId,
};
use dockcheck_runtime::backend::ContainerRuntime;
use dockcheck_runtime::discovery;
use serde::Serialize;
use tempfile::TempDir;

use crate::pipeline::PipelineDefinition;

/// Identity and image of one worker, fixed before anything is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    /// Position in discovery order (0-based).
    pub index: usize,
    /// Image the worker runs.
    pub image: ImageRef,
    /// Hostname the worker registers under (`host-{index}`).
    pub hostname: String,
    /// Resource the worker advertises (`foo{index}`).
    pub resource: String,
    /// Registration secret shared with the server.
    pub registration_key: String,
}

impl WorkerDescriptor {
    /// Describes worker `index`.
    #[must_use]
    pub fn new(index: usize, image: ImageRef, registration_key: impl Into<String>) -> Self {
        Self {
            index,
            image,
            hostname: format!("host-{index}"),
            resource: format!("foo{index}"),
            registration_key: registration_key.into(),
        }
    }

    /// Environment bound into the worker container, pointing it at `server_url`.
    #[must_use]
    pub fn env(&self, server_url: &str) -> EnvBindings {
        EnvBindings::new()
            .with(ENV_SERVER_URL, server_url)
            .with(ENV_REGISTER_KEY, &self.registration_key)
            .with(ENV_REGISTER_HOSTNAME, &self.hostname)
            .with(ENV_REGISTER_RESOURCES, &self.resource)
    }
}

/// Everything decided before the first container is created.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Identifier labelling every container of the run.
    pub run_id: RunId,
    /// Server image.
    pub server_image: ImageRef,
    /// Workers, in discovery order. Their count is the expected node count.
    pub workers: Vec<WorkerDescriptor>,
    /// Unit of work submitted once the server is ready.
    pub work: PipelineDefinition,
}

impl RunPlan {
    /// Builds a plan from explicit images.
    #[must_use]
    pub fn new(
        run_id: RunId,
        server_image: ImageRef,
        worker_images: Vec<ImageRef>,
        registration_key: &str,
        work: PipelineDefinition,
    ) -> Self {
        let workers = worker_images
            .into_iter()
            .enumerate()
            .map(|(index, image)| WorkerDescriptor::new(index, image, registration_key))
            .collect();
        Self {
            run_id,
            server_image,
            workers,
            work,
        }
    }

    /// Discovers local images and builds a plan around them.
    ///
    /// The registration key comes from the configuration, or is generated
    /// fresh for this run.
    ///
    /// # Errors
    ///
    /// Returns an error if images cannot be listed or no server image exists.
    pub fn discover(
        runtime: &dyn ContainerRuntime,
        config: &HarnessConfig,
        work: PipelineDefinition,
    ) -> Result<Self> {
        let images = discovery::discover(
            runtime,
            &config.server.image_filter,
            &config.workers.image_filter,
        )?;
        let key = config
            .workers
            .registration_key
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(Self::new(
            RunId::generate(),
            images.server.id,
            images.workers.into_iter().map(|w| w.id).collect(),
            &key,
            work,
        ))
    }
}

/// Where the server can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEndpoint {
    /// Management base URL as seen from the host.
    pub management_url: String,
    /// Server URL as seen from worker containers.
    pub worker_url: String,
}

/// A container created during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedContainer {
    /// Runtime identifier.
    pub id: ContainerId,
    /// Server or worker.
    pub role: ContainerRole,
    /// Human-readable label (`server`, `host-1`, ...).
    pub label: String,
    /// Last known state.
    pub state: ContainerState,
}

impl fmt::Display for TrackedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.role, self.label, self.id)
    }
}

/// Mutable state of one run.
///
/// Owned by exactly one run and only mutated from its thread of control.
#[derive(Debug)]
pub struct RunContext {
    run_id: RunId,
    workers: Vec<WorkerDescriptor>,
    work: PipelineDefinition,
    containers: Vec<TrackedContainer>,
    staged: Vec<TempDir>,
}

impl RunContext {
    /// Starts tracking a run with nothing created yet.
    #[must_use]
    pub fn new(run_id: RunId, workers: Vec<WorkerDescriptor>, work: PipelineDefinition) -> Self {
        Self {
            run_id,
            workers,
            work,
            containers: Vec::new(),
            staged: Vec::new(),
        }
    }

    /// Starts tracking the run described by `plan`.
    #[must_use]
    pub fn from_plan(plan: RunPlan) -> Self {
        Self::new(plan.run_id, plan.workers, plan.work)
    }

    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Runtime name for the container labelled `label`.
    #[must_use]
    pub fn container_name(&self, label: &str) -> String {
        format!("{APP_NAME}-{}-{label}", self.run_id)
    }

    /// Worker descriptors, in discovery order.
    #[must_use]
    pub fn workers(&self) -> &[WorkerDescriptor] {
        &self.workers
    }

    /// The unit of work.
    #[must_use]
    pub const fn work(&self) -> &PipelineDefinition {
        &self.work
    }

    /// Records a freshly created container.
    pub fn track(&mut self, id: ContainerId, role: ContainerRole, label: impl Into<String>) {
        self.containers.push(TrackedContainer {
            id,
            role,
            label: label.into(),
            state: ContainerState::Created,
        });
    }

    /// Updates the recorded state of a container.
    pub fn mark(&mut self, id: &ContainerId, state: ContainerState) {
        if let Some(c) = self.containers.iter_mut().find(|c| &c.id == id) {
            c.state = state;
        }
    }

    /// Takes ownership of a staged host directory until teardown.
    pub fn stage(&mut self, dir: TempDir) {
        self.staged.push(dir);
    }

    /// Every container created so far, in creation order.
    #[must_use]
    pub fn containers(&self) -> &[TrackedContainer] {
        &self.containers
    }

    /// The container created for the worker labelled `hostname`.
    #[must_use]
    pub fn container_for(&self, hostname: &str) -> Option<&TrackedContainer> {
        self.containers
            .iter()
            .find(|c| c.role == ContainerRole::Worker && c.label == hostname)
    }

    /// Containers not yet removed.
    pub fn outstanding(&self) -> impl Iterator<Item = &TrackedContainer> {
        self.containers
            .iter()
            .filter(|c| c.state != ContainerState::Removed)
    }

    /// Host paths of the staged directories.
    pub fn staged_paths(&self) -> impl Iterator<Item = &std::path::Path> {
        self.staged.iter().map(TempDir::path)
    }

    pub(crate) fn take_staged(&mut self) -> Vec<TempDir> {
        std::mem::take(&mut self.staged)
    }
}

#[cfg(test)]
mod tests {
    use dockcheck_runtime::fake::FakeRuntime;

    use super::*;

    #[test]
    fn worker_env_carries_identity_and_server_url() {
        let worker = WorkerDescriptor::new(2, ImageRef::new("sha256:a"), "secret");
        let env = worker.env("https://172.17.0.2:8154/go");
        assert_eq!(env.get(ENV_SERVER_URL), Some("https://172.17.0.2:8154/go"));
        assert_eq!(env.get(ENV_REGISTER_KEY), Some("secret"));
        assert_eq!(env.get(ENV_REGISTER_HOSTNAME), Some("host-2"));
        assert_eq!(env.get(ENV_REGISTER_RESOURCES), Some("foo2"));
    }

    #[test]
    fn discovered_plan_shares_one_generated_key() {
        let runtime = FakeRuntime::new()
            .with_image("sha256:s", "gocd/gocd-server:v1")
            .with_image("sha256:a", "gocd/gocd-agent-alpine:v1")
            .with_image("sha256:b", "gocd/gocd-agent-debian:v1");
        let plan =
            RunPlan::discover(&runtime, &HarnessConfig::default(), PipelineDefinition::default())
                .unwrap();
        assert_eq!(plan.server_image.as_str(), "sha256:s");
        assert_eq!(plan.workers.len(), 2);
        assert_eq!(plan.workers[1].hostname, "host-1");
        assert!(!plan.workers[0].registration_key.is_empty());
        assert_eq!(plan.workers[0].registration_key, plan.workers[1].registration_key);
    }

    #[test]
    fn configured_key_is_used_verbatim() {
        let runtime = FakeRuntime::new()
            .with_image("sha256:s", "gocd/gocd-server:v1")
            .with_image("sha256:a", "gocd/gocd-agent-alpine:v1");
        let mut config = HarnessConfig::default();
        config.workers.registration_key = Some("fixed-key".into());
        let plan = RunPlan::discover(&runtime, &config, PipelineDefinition::default()).unwrap();
        assert_eq!(plan.workers[0].registration_key, "fixed-key");
    }

    #[test]
    fn outstanding_skips_removed_containers() {
        let mut ctx = RunContext::new(RunId::new("r"), Vec::new(), PipelineDefinition::default());
        ctx.track(ContainerId::new("a"), ContainerRole::Server, "server");
        ctx.track(ContainerId::new("b"), ContainerRole::Worker, "host-0");
        ctx.mark(&ContainerId::new("b"), ContainerState::Removed);
        let left: Vec<_> = ctx.outstanding().map(|c| c.label.as_str()).collect();
        assert_eq!(left, vec!["server"]);
        assert!(ctx.container_for("host-0").is_some());
    }
}
