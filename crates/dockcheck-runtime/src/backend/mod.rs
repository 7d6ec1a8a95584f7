//! Container runtime abstraction.

pub mod docker;

use std::collections::BTreeMap;

use dockcheck_common::error::Result;
use dockcheck_common::types::{
    ContainerId, EnvBindings, ImageRef, PortBinding, VolumeBinding,
};

use crate::exec::ExecOutput;

/// Configuration for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image to create the container from.
    pub image: ImageRef,
    /// Environment variables.
    pub env: EnvBindings,
    /// Ports published on the host.
    pub ports: Vec<PortBinding>,
    /// Host directories bind-mounted into the container.
    pub volumes: Vec<VolumeBinding>,
    /// Labels attached to the container.
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Creates a spec with no bindings.
    #[must_use]
    pub fn new(name: impl Into<String>, image: ImageRef) -> Self {
        Self {
            name: name.into(),
            image,
            env: EnvBindings::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Replaces the environment.
    #[must_use]
    pub fn env(mut self, env: EnvBindings) -> Self {
        self.env = env;
        self
    }

    /// Publishes a container port on a host port.
    #[must_use]
    pub fn port(mut self, binding: PortBinding) -> Self {
        self.ports.push(binding);
        self
    }

    /// Bind-mounts a host directory.
    #[must_use]
    pub fn volume(mut self, binding: VolumeBinding) -> Self {
        self.volumes.push(binding);
        self
    }

    /// Attaches a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.labels.insert(key.into(), value.into());
        self
    }
}

/// A local image known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image identifier (digest).
    pub id: ImageRef,
    /// `repository:tag` names pointing at the image.
    pub repo_tags: Vec<String>,
}

impl ImageInfo {
    /// Whether any repo tag contains `fragment`.
    #[must_use]
    pub fn tagged_with(&self, fragment: &str) -> bool {
        self.repo_tags.iter().any(|t| t.contains(fragment))
    }
}

/// Inspection result for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// IP address on the runtime's default network.
    pub ip_address: Option<String>,
    /// Exposed container ports mapped to the host ports they are published on.
    /// An exposed but unpublished port maps to an empty list.
    pub ports: BTreeMap<String, Vec<u16>>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// Whether the container is running.
    pub running: bool,
}

impl ContainerDetails {
    /// Exposed container ports, sorted.
    #[must_use]
    pub fn exposed_ports(&self) -> Vec<&str> {
        self.ports.keys().map(String::as_str).collect()
    }
}

/// A process running inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process id as reported by the runtime.
    pub pid: String,
    /// Full command line.
    pub command: String,
}

/// Platform-agnostic container runtime.
///
/// Implementors handle the details of talking to a container engine. All
/// calls block until the engine has answered.
pub trait ContainerRuntime: Send + Sync {
    /// Lists local images in the order the engine reports them.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn list_images(&self) -> Result<Vec<ImageInfo>>;

    /// Creates (but does not start) a container.
    ///
    /// # Errors
    ///
    /// Returns a provisioning error if the engine rejects the spec.
    fn create(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Starts a previously created container.
    ///
    /// # Errors
    ///
    /// Returns a provisioning error if the container cannot be started.
    fn start(&self, id: &ContainerId) -> Result<()>;

    /// Inspects a container's network settings and labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown.
    fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Lists processes running inside a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not running.
    fn top(&self, id: &ContainerId) -> Result<Vec<ProcessEntry>>;

    /// Executes a command inside a running container.
    ///
    /// A non-zero exit code is reported in the output, not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be launched.
    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput>;

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    fn stop(&self, id: &ContainerId) -> Result<()>;

    /// Deletes a stopped container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    fn remove(&self, id: &ContainerId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_spec_builder_accumulates_bindings() {
        let spec = ContainerSpec::new("srv", ImageRef::new("gocd-server:v1"))
            .env(EnvBindings::new().with("SERVER_MEM", "1g"))
            .port(PortBinding::new("8153/tcp", 8253))
            .port(PortBinding::new("8154/tcp", 8254))
            .label("dockcheck.role", "server");
        assert_eq!(spec.ports.len(), 2);
        assert_eq!(spec.env.get("SERVER_MEM"), Some("1g"));
        assert_eq!(spec.labels.get("dockcheck.role").map(String::as_str), Some("server"));
    }

    #[test]
    fn image_tag_match_is_substring() {
        let image = ImageInfo {
            id: ImageRef::new("sha256:abc"),
            repo_tags: vec!["gocd/gocd-agent-alpine:v17.3.0".into()],
        };
        assert!(image.tagged_with("gocd-agent"));
        assert!(!image.tagged_with("gocd-server"));
    }
}
