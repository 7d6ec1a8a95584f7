//! Server container provisioning.

use std::path::PathBuf;

use dockcheck_common::config::ServerSettings;
use dockcheck_common::constants::{
    LABEL_ROLE, LABEL_RUN, SERVER_CONTEXT_PATH, SERVER_DATA_MOUNT, SERVER_HTTP_PORT,
    SERVER_HTTPS_PORT, SERVER_HTTPS_PORT_NUMBER,
};
use dockcheck_common::error::{HarnessError, Result};
use dockcheck_common::types::{
    ContainerId, ContainerRole, ContainerState, EnvBindings, ImageRef, PortBinding, VolumeBinding,
};
use dockcheck_runtime::backend::{ContainerRuntime, ContainerSpec};

use crate::context::{RunContext, ServerEndpoint};
use crate::staging;

/// How the server container is wired to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOptions {
    /// Publish the HTTP and HTTPS ports on the configured host ports.
    pub publish_ports: bool,
    /// Bind a staged data directory (seeded from the fixture, if any).
    pub bind_data_dir: bool,
    /// Environment added on top of the configured server environment.
    pub extra_env: EnvBindings,
}

impl ServerOptions {
    /// Ports published and data directory bound, as a full run needs.
    #[must_use]
    pub fn full() -> Self {
        Self {
            publish_ports: true,
            bind_data_dir: true,
            extra_env: EnvBindings::new(),
        }
    }
}

/// A started server container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedServer {
    /// Runtime identifier.
    pub id: ContainerId,
    /// How to reach it.
    pub endpoint: ServerEndpoint,
    /// Host side of the bound data directory, if one was staged.
    pub data_dir: Option<PathBuf>,
}

/// Creates and starts the server container, recording it in `ctx`.
///
/// Everything created is tracked before the next runtime call, so a
/// failure part-way leaves nothing teardown cannot find.
///
/// # Errors
///
/// Returns a provisioning error if the runtime rejects the container or
/// reports no address for it, or an I/O error if staging fails.
pub fn provision(
    runtime: &dyn ContainerRuntime,
    ctx: &mut RunContext,
    image: &ImageRef,
    settings: &ServerSettings,
    options: &ServerOptions,
) -> Result<ProvisionedServer> {
    let mut env = settings.env.clone();
    for (name, value) in options.extra_env.iter() {
        env = env.with(name, value);
    }
    let mut spec = ContainerSpec::new(ctx.container_name("server"), image.clone())
        .env(env)
        .label(LABEL_RUN, ctx.run_id().as_str())
        .label(LABEL_ROLE, ContainerRole::Server.to_string());

    if options.publish_ports {
        spec = spec
            .port(PortBinding::new(SERVER_HTTP_PORT, settings.http_host_port))
            .port(PortBinding::new(SERVER_HTTPS_PORT, settings.https_host_port));
    }

    let mut data_dir = None;
    if options.bind_data_dir {
        let dir = staging::stage_dir(ctx.run_id(), settings.fixture_dir.as_deref())?;
        let path = dir.path().to_path_buf();
        ctx.stage(dir);
        spec = spec.volume(VolumeBinding {
            host_path: path.clone(),
            container_path: SERVER_DATA_MOUNT.into(),
            read_write: true,
        });
        data_dir = Some(path);
    }

    let id = runtime.create(&spec)?;
    ctx.track(id.clone(), ContainerRole::Server, "server");
    runtime.start(&id)?;
    ctx.mark(&id, ContainerState::Running);

    let details = runtime.inspect(&id)?;
    let ip = details
        .ip_address
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| HarnessError::provisioning("server", "runtime reported no IP address"))?;
    let endpoint = ServerEndpoint {
        management_url: settings.management_url(),
        worker_url: format!("https://{ip}:{SERVER_HTTPS_PORT_NUMBER}{SERVER_CONTEXT_PATH}"),
    };
    tracing::info!(
        container = %id,
        image = %image,
        management_url = %endpoint.management_url,
        worker_url = %endpoint.worker_url,
        "server started"
    );
    Ok(ProvisionedServer {
        id,
        endpoint,
        data_dir,
    })
}

#[cfg(test)]
mod tests {
    use dockcheck_common::types::RunId;
    use dockcheck_runtime::fake::FakeRuntime;

    use super::*;
    use crate::pipeline::PipelineDefinition;

    fn context() -> RunContext {
        RunContext::new(RunId::new("abc"), Vec::new(), PipelineDefinition::default())
    }

    #[test]
    fn full_provisioning_publishes_ports_and_binds_data() {
        let rt = FakeRuntime::new();
        let mut ctx = context();
        let server = provision(
            &rt,
            &mut ctx,
            &ImageRef::new("sha256:s"),
            &ServerSettings::default(),
            &ServerOptions::full(),
        )
        .unwrap();

        assert_eq!(server.endpoint.management_url, "http://0.0.0.0:8253/go");
        assert_eq!(server.endpoint.worker_url, "https://172.17.0.2:8154/go");
        assert!(server.data_dir.as_ref().unwrap().is_dir());

        let spec = &rt.containers()[0].spec;
        assert_eq!(spec.name, "dockcheck-abc-server");
        assert_eq!(spec.ports.len(), 2);
        assert_eq!(spec.volumes[0].container_path, "/godata");
        assert!(spec.volumes[0].read_write);
        assert_eq!(spec.labels.get(LABEL_RUN).map(String::as_str), Some("abc"));
        assert_eq!(ctx.outstanding().count(), 1);
        assert_eq!(ctx.staged_paths().count(), 1);
    }

    #[test]
    fn bare_provisioning_has_no_bindings() {
        let rt = FakeRuntime::new();
        let mut ctx = context();
        let options = ServerOptions {
            extra_env: EnvBindings::new().with("SERVER_MEM", "1g"),
            ..ServerOptions::default()
        };
        let server = provision(
            &rt,
            &mut ctx,
            &ImageRef::new("sha256:s"),
            &ServerSettings::default(),
            &options,
        )
        .unwrap();
        assert!(server.data_dir.is_none());
        let spec = &rt.containers()[0].spec;
        assert!(spec.ports.is_empty());
        assert!(spec.volumes.is_empty());
        assert_eq!(spec.env.get("SERVER_MEM"), Some("1g"));
    }

    #[test]
    fn failed_start_is_still_tracked() {
        let rt = FakeRuntime::new().fail_start("sha256:s");
        let mut ctx = context();
        let err = provision(
            &rt,
            &mut ctx,
            &ImageRef::new("sha256:s"),
            &ServerSettings::default(),
            &ServerOptions::full(),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::Provisioning { .. }));
        assert_eq!(ctx.containers().len(), 1);
        assert_eq!(ctx.containers()[0].state, ContainerState::Created);
    }
}
