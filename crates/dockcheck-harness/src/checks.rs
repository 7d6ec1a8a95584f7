//! Assertion-style checks of a lone server container.
//!
//! Each scenario provisions its own server inside a [`TeardownGuard`], so a
//! failed assertion never leaks a container or a staged directory.

use std::path::Path;

use dockcheck_common::config::HarnessConfig;
use dockcheck_common::constants::{
    SERVER_CONTAINER_DIRS, SERVER_DATA_DIRS, SERVER_HTTP_PORT, SERVER_HTTPS_PORT,
};
use dockcheck_common::error::{HarnessError, Result};
use dockcheck_common::types::{EnvBindings, ImageRef, RunId};
use dockcheck_probe::api::ServerApi;
use dockcheck_probe::http::HttpClient;
use dockcheck_probe::probes::{EndpointUp, PipelineServed, await_ready};
use dockcheck_runtime::backend::{ContainerDetails, ContainerRuntime, ProcessEntry};
use dockcheck_runtime::exec::ExecOutput;

use crate::budgets::Budgets;
use crate::context::RunContext;
use crate::pipeline::PipelineDefinition;
use crate::server::{self, ProvisionedServer, ServerOptions};
use crate::staging;
use crate::teardown::TeardownGuard;

/// Memory settings passed to the server in the environment scenario.
pub const MEMORY_ENV: [(&str, &str); 2] = [("SERVER_MEM", "1g"), ("SERVER_MAX_MEM", "2g")];
/// JVM arguments those settings must produce.
pub const MEMORY_ARGS: &str = "-Xms1g -Xmx2g";

/// A check scenario that passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Scenario name.
    pub name: &'static str,
    /// Individual assertions that held.
    pub assertions: Vec<String>,
}

/// Runs server check scenarios.
pub struct ServerChecks<'a> {
    runtime: &'a dyn ContainerRuntime,
    http: &'a dyn HttpClient,
    config: &'a HarnessConfig,
    budgets: Budgets,
}

impl<'a> ServerChecks<'a> {
    /// Creates a check runner.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the configured budgets are invalid.
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        http: &'a dyn HttpClient,
        config: &'a HarnessConfig,
    ) -> Result<Self> {
        Ok(Self {
            runtime,
            http,
            config,
            budgets: Budgets::from_config(&config.budgets)?,
        })
    }

    /// Runs every scenario in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failed assertion or provisioning error.
    pub fn run_all(&self, image: &ImageRef) -> Result<Vec<CheckOutcome>> {
        Ok(vec![
            self.container_layout(image)?,
            self.bindings(image)?,
            self.memory_settings(image)?,
        ])
    }

    /// An unbound server exposes its two ports and has its working
    /// directories in place.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Assertion`] on a mismatch.
    pub fn container_layout(&self, image: &ImageRef) -> Result<CheckOutcome> {
        self.scoped("container-layout", image, &ServerOptions::default(), |server| {
            let details = self.runtime.inspect(&server.id)?;
            assert_exposed_unpublished(&details, &[SERVER_HTTP_PORT, SERVER_HTTPS_PORT])?;
            let listing = self.runtime.exec(&server.id, &["ls".to_string()])?;
            assert_lists(&listing, SERVER_CONTAINER_DIRS)?;
            Ok(vec![
                "exposes 8153/tcp and 8154/tcp".to_string(),
                format!("lists {}", SERVER_CONTAINER_DIRS.join(", ")),
            ])
        })
    }

    /// A server with published ports and a bound data directory answers on
    /// the host, serves the fixture pipeline, and populates the directory.
    ///
    /// # Errors
    ///
    /// Returns an exhaustion error if the server never answers, or
    /// [`HarnessError::Assertion`] on a mismatch.
    pub fn bindings(&self, image: &ImageRef) -> Result<CheckOutcome> {
        self.scoped("bindings", image, &ServerOptions::full(), |server| {
            let mut held = Vec::new();
            let url = &server.endpoint.management_url;
            await_ready(&EndpointUp::new(self.http, url), &self.budgets.endpoint_up)?;
            held.push(format!("answers on {url}"));

            let api = ServerApi::new(self.http, url);
            if let Some(pipeline) = &self.config.server.fixture_pipeline {
                await_ready(
                    &PipelineServed::new(&api, pipeline.as_str()),
                    &self.budgets.endpoint_up,
                )?;
                held.push(format!("serves pipeline {pipeline}"));
            }

            if let Some(dir) = &server.data_dir {
                assert_subdirectories(dir, SERVER_DATA_DIRS)?;
                held.push(format!("populates {}", SERVER_DATA_DIRS.join(", ")));
            }

            if !self.config.expected_plugins.is_empty() {
                let installed = api.plugin_ids()?;
                let expected = &self.config.expected_plugins;
                assert_contains_all("installed plugins", &installed, expected)?;
                held.push(format!("has plugins {}", expected.join(", ")));
            }
            Ok(held)
        })
    }

    /// Memory settings in the environment reach the server process.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Assertion`] if no process carries the
    /// expected JVM arguments.
    pub fn memory_settings(&self, image: &ImageRef) -> Result<CheckOutcome> {
        let options = ServerOptions {
            publish_ports: true,
            bind_data_dir: false,
            extra_env: MEMORY_ENV.into_iter().collect::<EnvBindings>(),
        };
        self.scoped("memory-settings", image, &options, |server| {
            await_ready(
                &EndpointUp::new(self.http, &server.endpoint.management_url),
                &self.budgets.endpoint_up,
            )?;
            let processes = self.runtime.top(&server.id)?;
            assert_process_args(&processes, MEMORY_ARGS)?;
            Ok(vec![format!("server runs with {MEMORY_ARGS}")])
        })
    }

    fn scoped(
        &self,
        name: &'static str,
        image: &ImageRef,
        options: &ServerOptions,
        check: impl FnOnce(&ProvisionedServer) -> Result<Vec<String>>,
    ) -> Result<CheckOutcome> {
        tracing::info!(check = name, "running server check");
        let context =
            RunContext::new(RunId::generate(), Vec::new(), PipelineDefinition::default());
        let mut guard = TeardownGuard::new(self.runtime, context);
        let outcome = server::provision(
            self.runtime,
            &mut *guard,
            image,
            &self.config.server,
            options,
        )
        .and_then(|server| check(&server));
        let summary = guard.finish();
        if !summary.is_clean() {
            tracing::warn!(check = name, errors = ?summary.errors, "teardown incomplete");
        }
        match outcome {
            Ok(assertions) => {
                tracing::info!(check = name, "check passed");
                Ok(CheckOutcome { name, assertions })
            }
            Err(e) => {
                tracing::error!(check = name, error = %e, "check failed");
                Err(e)
            }
        }
    }
}

/// Asserts the container exposes exactly `expected` and publishes none of them.
///
/// # Errors
///
/// Returns [`HarnessError::Assertion`] on a mismatch.
pub fn assert_exposed_unpublished(details: &ContainerDetails, expected: &[&str]) -> Result<()> {
    let mut wanted = expected.to_vec();
    wanted.sort_unstable();
    let actual = details.exposed_ports();
    if actual != wanted {
        return Err(HarnessError::assertion(
            "exposed ports",
            format!("{wanted:?}"),
            format!("{actual:?}"),
        ));
    }
    let published: Vec<_> = details
        .ports
        .iter()
        .filter(|(_, hosts)| !hosts.is_empty())
        .map(|(port, _)| port.as_str())
        .collect();
    if !published.is_empty() {
        return Err(HarnessError::assertion("published ports", "[]", format!("{published:?}")));
    }
    Ok(())
}

/// Asserts a listing command succeeded and printed every entry.
///
/// # Errors
///
/// Returns [`HarnessError::Assertion`] on a non-zero exit or a missing entry.
pub fn assert_lists(output: &ExecOutput, entries: &[&str]) -> Result<()> {
    if !output.success() {
        return Err(HarnessError::assertion("ls exit code", 0, output.exit_code));
    }
    let missing: Vec<_> = entries.iter().filter(|e| !output.lists(e)).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::assertion(
            "working directory listing",
            format!("{entries:?}"),
            output.stdout.split_whitespace().collect::<Vec<_>>().join(" "),
        ))
    }
}

/// Asserts `dir` contains every directory in `expected`.
///
/// # Errors
///
/// Returns [`HarnessError::Assertion`] if one is missing, or an I/O error.
pub fn assert_subdirectories(dir: &Path, expected: &[&str]) -> Result<()> {
    let actual = staging::subdirectories(dir)?;
    if expected.iter().all(|e| actual.iter().any(|a| a == e)) {
        Ok(())
    } else {
        Err(HarnessError::assertion(
            format!("contents of {}", dir.display()),
            format!("{expected:?}"),
            format!("{actual:?}"),
        ))
    }
}

/// Asserts some process command line contains `needle`.
///
/// # Errors
///
/// Returns [`HarnessError::Assertion`] if none does.
pub fn assert_process_args(processes: &[ProcessEntry], needle: &str) -> Result<()> {
    if processes.iter().any(|p| p.command.contains(needle)) {
        Ok(())
    } else {
        let commands: Vec<_> = processes.iter().map(|p| p.command.as_str()).collect();
        Err(HarnessError::assertion(
            "server process arguments",
            format!("a command containing '{needle}'"),
            format!("{commands:?}"),
        ))
    }
}

/// Asserts `actual` contains every value in `expected`.
///
/// # Errors
///
/// Returns [`HarnessError::Assertion`] naming the missing values.
pub fn assert_contains_all(what: &str, actual: &[String], expected: &[String]) -> Result<()> {
    let missing: Vec<_> = expected.iter().filter(|e| !actual.contains(e)).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::assertion(
            what,
            format!("{expected:?}"),
            format!("{actual:?} (missing {missing:?})"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn details(ports: &[(&str, &[u16])]) -> ContainerDetails {
        ContainerDetails {
            ports: ports
                .iter()
                .map(|(p, h)| ((*p).to_string(), h.to_vec()))
                .collect::<BTreeMap<_, _>>(),
            ..ContainerDetails::default()
        }
    }

    #[test]
    fn exposed_ports_must_match_exactly() {
        let expected = [SERVER_HTTP_PORT, SERVER_HTTPS_PORT];
        let both = details(&[("8154/tcp", &[]), ("8153/tcp", &[])]);
        assert!(assert_exposed_unpublished(&both, &expected).is_ok());

        let one = details(&[("8153/tcp", &[])]);
        let err = assert_exposed_unpublished(&one, &expected).unwrap_err();
        assert!(matches!(err, HarnessError::Assertion { ref what, .. } if what == "exposed ports"));

        let published = details(&[("8153/tcp", &[8253]), ("8154/tcp", &[])]);
        assert!(assert_exposed_unpublished(&published, &expected).is_err());
    }

    #[test]
    fn listing_requires_zero_exit_and_all_entries() {
        let ok = ExecOutput {
            stdout: "go-working-dir\ngodata\n".into(),
            ..ExecOutput::default()
        };
        assert!(assert_lists(&ok, SERVER_CONTAINER_DIRS).is_ok());

        let partial = ExecOutput {
            stdout: "godata\n".into(),
            ..ExecOutput::default()
        };
        assert!(assert_lists(&partial, SERVER_CONTAINER_DIRS).is_err());

        let failed = ExecOutput {
            exit_code: 2,
            ..ok
        };
        let err = assert_lists(&failed, SERVER_CONTAINER_DIRS).unwrap_err();
        assert_eq!(err.to_string(), "assertion failed for ls exit code: expected 0, got 2");
    }

    #[test]
    fn process_args_are_searched_in_every_command() {
        let processes = vec![
            ProcessEntry {
                pid: "1".into(),
                command: "/sbin/tini -- /docker-entrypoint.sh".into(),
            },
            ProcessEntry {
                pid: "42".into(),
                command: "java -Xms1g -Xmx2g -jar go.jar".into(),
            },
        ];
        assert!(assert_process_args(&processes, MEMORY_ARGS).is_ok());
        assert!(assert_process_args(&processes[..1], MEMORY_ARGS).is_err());
    }

    #[test]
    fn missing_plugins_are_named() {
        let installed = vec!["yaml.config.plugin".to_string()];
        let err = assert_contains_all("installed plugins", &installed, &["github.pr".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("missing [\"github.pr\"]"));
    }

    #[test]
    fn data_directory_must_be_populated() {
        let dir = tempfile::tempdir().unwrap();
        for name in SERVER_DATA_DIRS {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        assert!(assert_subdirectories(dir.path(), SERVER_DATA_DIRS).is_ok());
        std::fs::remove_dir(dir.path().join("db")).unwrap();
        assert!(assert_subdirectories(dir.path(), SERVER_DATA_DIRS).is_err());
    }
}
