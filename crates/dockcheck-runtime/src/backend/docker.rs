//! Docker backend driving the `docker` command-line client.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use dockcheck_common::error::{HarnessError, Result};
use dockcheck_common::types::{ContainerId, ImageRef};
use serde::Deserialize;

use super::{ContainerDetails, ContainerRuntime, ContainerSpec, ImageInfo, ProcessEntry};
use crate::exec::ExecOutput;

/// Backend that shells out to the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    /// Locates the `docker` binary on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotFound`] if no `docker` binary is installed.
    pub fn locate() -> Result<Self> {
        let binary = which::which("docker").map_err(|_| HarnessError::NotFound {
            kind: "binary",
            id: "docker".into(),
        })?;
        tracing::debug!(binary = %binary.display(), "using docker CLI");
        Ok(Self { binary })
    }

    /// Uses an explicit client binary.
    #[must_use]
    pub const fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    fn output(&self, args: &[String]) -> Result<ExecOutput> {
        tracing::trace!(?args, "docker");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| HarnessError::Io {
                path: self.binary.clone(),
                source: e,
            })?;
        Ok(output.into())
    }

    /// Runs a command and returns its stdout, mapping failure to a
    /// provisioning error for `target`.
    fn run(&self, target: &str, args: &[String]) -> Result<String> {
        let out = self.output(args)?;
        if !out.success() {
            return Err(HarnessError::provisioning(target, out.stderr.trim()));
        }
        Ok(out.stdout)
    }
}

impl ContainerRuntime for DockerCli {
    fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let stdout = self.run(
            "image listing",
            &strings(&["image", "ls", "--no-trunc", "--format", "{{json .}}"]),
        )?;
        parse_image_lines(&stdout)
    }

    fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let stdout = self.run(&spec.name, &create_args(spec))?;
        let id = ContainerId::new(stdout.trim());
        tracing::info!(id = %id, name = %spec.name, image = %spec.image, "container created");
        Ok(id)
    }

    fn start(&self, id: &ContainerId) -> Result<()> {
        let _ = self.run(id.as_str(), &strings(&["start", id.as_str()]))?;
        tracing::info!(id = %id, "container started");
        Ok(())
    }

    fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let stdout = self.run(id.as_str(), &strings(&["inspect", id.as_str()]))?;
        parse_inspect(id, &stdout)
    }

    fn top(&self, id: &ContainerId) -> Result<Vec<ProcessEntry>> {
        let stdout = self.run(id.as_str(), &strings(&["top", id.as_str(), "-eo", "pid,args"]))?;
        Ok(parse_top(&stdout))
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        if cmd.is_empty() {
            return Err(HarnessError::Config {
                message: "exec command is empty".into(),
            });
        }
        tracing::info!(id = %id, ?cmd, "exec into container");
        let mut args = strings(&["exec", id.as_str()]);
        args.extend(cmd.iter().cloned());
        self.output(&args)
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        let _ = self.run(id.as_str(), &strings(&["stop", id.as_str()]))?;
        tracing::info!(id = %id, "container stopped");
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let _ = self.run(id.as_str(), &strings(&["rm", "--volumes", id.as_str()]))?;
        tracing::info!(id = %id, "container removed");
        Ok(())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

/// Builds the argument list for `docker create`.
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = strings(&["create", "--name", &spec.name]);
    for (key, value) in &spec.labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }
    for assignment in spec.env.to_assignments() {
        args.push("--env".into());
        args.push(assignment);
    }
    for port in &spec.ports {
        args.push("--publish".into());
        args.push(format!("{}:{}", port.host_port, port.container_port));
    }
    for volume in &spec.volumes {
        args.push("--volume".into());
        args.push(volume.to_string());
    }
    args.push(spec.image.to_string());
    args
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageLine {
    #[serde(rename = "ID")]
    id: String,
    repository: String,
    tag: String,
}

/// Parses `docker image ls --format '{{json .}}'` output, merging tags that
/// point at the same image while keeping first-seen order.
fn parse_image_lines(stdout: &str) -> Result<Vec<ImageInfo>> {
    let mut images: Vec<ImageInfo> = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let entry: ImageLine = serde_json::from_str(line)?;
        let tag = (entry.repository != "<none>")
            .then(|| format!("{}:{}", entry.repository, entry.tag));
        if let Some(existing) = images.iter_mut().find(|i| i.id.as_str() == entry.id) {
            existing.repo_tags.extend(tag);
        } else {
            images.push(ImageInfo {
                id: ImageRef::new(entry.id),
                repo_tags: tag.into_iter().collect(),
            });
        }
    }
    Ok(images)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDoc {
    state: InspectState,
    config: InspectConfig,
    network_settings: InspectNetwork,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(rename = "IPAddress")]
    ip_address: Option<String>,
    ports: Option<BTreeMap<String, Option<Vec<HostBinding>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostBinding {
    host_port: String,
}

fn parse_inspect(id: &ContainerId, stdout: &str) -> Result<ContainerDetails> {
    let docs: Vec<InspectDoc> = serde_json::from_str(stdout)?;
    let doc = docs.into_iter().next().ok_or_else(|| HarnessError::NotFound {
        kind: "container",
        id: id.to_string(),
    })?;
    let ports = doc
        .network_settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| {
            let host_ports = bindings
                .unwrap_or_default()
                .iter()
                .filter_map(|b| b.host_port.parse().ok())
                .collect();
            (port, host_ports)
        })
        .collect();
    Ok(ContainerDetails {
        ip_address: doc.network_settings.ip_address.filter(|ip| !ip.is_empty()),
        ports,
        labels: doc.config.labels.unwrap_or_default(),
        running: doc.state.running,
    })
}

/// Parses `docker top <id> -eo pid,args`, skipping the header row.
fn parse_top(stdout: &str) -> Vec<ProcessEntry> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            let (pid, command) = line.split_once(char::is_whitespace)?;
            Some(ProcessEntry {
                pid: pid.to_string(),
                command: command.trim().to_string(),
            })
        })
        .collect()
}
