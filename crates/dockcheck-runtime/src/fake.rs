//! In-memory runtime for testing.
//!
//! Records every call and tracks container state, making it easy to write
//! deterministic tests for the orchestration code without a container
//! engine.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dockcheck_common::error::{HarnessError, Result};
use dockcheck_common::types::{ContainerId, ContainerState, ImageRef};

use crate::backend::{ContainerDetails, ContainerRuntime, ContainerSpec, ImageInfo, ProcessEntry};
use crate::exec::ExecOutput;

/// A call made against the fake runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `list_images`
    ListImages,
    /// `create`
    Create {
        /// Requested container name.
        name: String,
        /// Requested image.
        image: ImageRef,
    },
    /// `start`
    Start(ContainerId),
    /// `inspect`
    Inspect(ContainerId),
    /// `top`
    Top(ContainerId),
    /// `exec`
    Exec(ContainerId, Vec<String>),
    /// `stop`
    Stop(ContainerId),
    /// `remove`
    Remove(ContainerId),
}

/// A container tracked by the fake runtime.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    /// Assigned identifier.
    pub id: ContainerId,
    /// Spec it was created from.
    pub spec: ContainerSpec,
    /// Current state.
    pub state: ContainerState,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    calls: Vec<RuntimeCall>,
}

/// A test double implementing [`ContainerRuntime`].
#[derive(Debug, Default)]
pub struct FakeRuntime {
    images: Vec<ImageInfo>,
    exposed_ports: Vec<String>,
    exec_output: ExecOutput,
    processes: Vec<ProcessEntry>,
    failing_creates: Vec<String>,
    failing_starts: Vec<String>,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    /// Creates an empty runtime with no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a local image with a single repo tag.
    #[must_use]
    pub fn with_image(mut self, id: &str, repo_tag: &str) -> Self {
        self.images.push(ImageInfo {
            id: ImageRef::new(id),
            repo_tags: vec![repo_tag.to_string()],
        });
        self
    }

    /// Ports every container exposes, whether published or not.
    #[must_use]
    pub fn with_exposed_ports(mut self, ports: &[&str]) -> Self {
        self.exposed_ports = ports.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Output returned by every `exec`.
    #[must_use]
    pub fn with_exec_output(mut self, output: ExecOutput) -> Self {
        self.exec_output = output;
        self
    }

    /// Processes returned by every `top`.
    #[must_use]
    pub fn with_processes(mut self, processes: Vec<ProcessEntry>) -> Self {
        self.processes = processes;
        self
    }

    /// Makes `create` fail for images whose reference contains `fragment`.
    #[must_use]
    pub fn fail_create(mut self, fragment: &str) -> Self {
        self.failing_creates.push(fragment.to_string());
        self
    }

    /// Makes `start` fail for containers whose image contains `fragment`.
    #[must_use]
    pub fn fail_start(mut self, fragment: &str) -> Self {
        self.failing_starts.push(fragment.to_string());
        self
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// All containers ever created, in creation order.
    pub fn containers(&self) -> Vec<FakeContainer> {
        self.lock().containers.clone()
    }

    /// Containers that have not been removed.
    pub fn live_containers(&self) -> Vec<FakeContainer> {
        self.containers()
            .into_iter()
            .filter(|c| c.state != ContainerState::Removed)
            .collect()
    }

    /// Images of containers that were started, in start order.
    pub fn started_images(&self) -> Vec<ImageRef> {
        let state = self.lock();
        state
            .calls
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Start(id) => state
                    .containers
                    .iter()
                    .find(|c| &c.id == id)
                    .map(|c| c.spec.image.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_container<T>(
        &self,
        call: RuntimeCall,
        id: &ContainerId,
        f: impl FnOnce(&mut FakeContainer, usize) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock();
        state.calls.push(call);
        let index = state
            .containers
            .iter()
            .position(|c| &c.id == id && c.state != ContainerState::Removed)
            .ok_or_else(|| HarnessError::NotFound {
                kind: "container",
                id: id.to_string(),
            })?;
        f(&mut state.containers[index], index)
    }
}

fn require_running(container: &FakeContainer) -> Result<()> {
    if container.state == ContainerState::Running {
        Ok(())
    } else {
        Err(HarnessError::provisioning(
            container.id.as_str(),
            format!("container is {}", container.state),
        ))
    }
}

impl ContainerRuntime for FakeRuntime {
    fn list_images(&self) -> Result<Vec<ImageInfo>> {
        self.lock().calls.push(RuntimeCall::ListImages);
        Ok(self.images.clone())
    }

    fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Create {
            name: spec.name.clone(),
            image: spec.image.clone(),
        });
        if self
            .failing_creates
            .iter()
            .any(|f| spec.image.as_str().contains(f.as_str()))
        {
            return Err(HarnessError::provisioning(&spec.name, "create rejected"));
        }
        let id = ContainerId::new(format!("fake-{}", state.containers.len() + 1));
        state.containers.push(FakeContainer {
            id: id.clone(),
            spec: spec.clone(),
            state: ContainerState::Created,
        });
        Ok(id)
    }

    fn start(&self, id: &ContainerId) -> Result<()> {
        self.with_container(RuntimeCall::Start(id.clone()), id, |c, _| {
            if self
                .failing_starts
                .iter()
                .any(|f| c.spec.image.as_str().contains(f.as_str()))
            {
                return Err(HarnessError::provisioning(c.id.as_str(), "start rejected"));
            }
            c.state = ContainerState::Running;
            Ok(())
        })
    }

    fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.with_container(RuntimeCall::Inspect(id.clone()), id, |c, index| {
            let mut ports: BTreeMap<String, Vec<u16>> = self
                .exposed_ports
                .iter()
                .map(|p| (p.clone(), Vec::new()))
                .collect();
            for binding in &c.spec.ports {
                ports
                    .entry(binding.container_port.clone())
                    .or_default()
                    .push(binding.host_port);
            }
            Ok(ContainerDetails {
                ip_address: Some(format!("172.17.0.{}", index + 2)),
                ports,
                labels: c.spec.labels.clone(),
                running: c.state == ContainerState::Running,
            })
        })
    }

    fn top(&self, id: &ContainerId) -> Result<Vec<ProcessEntry>> {
        self.with_container(RuntimeCall::Top(id.clone()), id, |c, _| {
            require_running(c)?;
            Ok(self.processes.clone())
        })
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        self.with_container(RuntimeCall::Exec(id.clone(), cmd.to_vec()), id, |c, _| {
            require_running(c)?;
            Ok(self.exec_output.clone())
        })
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        self.with_container(RuntimeCall::Stop(id.clone()), id, |c, _| {
            c.state = ContainerState::Stopped;
            Ok(())
        })
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        self.with_container(RuntimeCall::Remove(id.clone()), id, |c, _| {
            if c.state == ContainerState::Running {
                return Err(HarnessError::provisioning(
                    c.id.as_str(),
                    "cannot remove a running container",
                ));
            }
            c.state = ContainerState::Removed;
            Ok(())
        })
    }
}
