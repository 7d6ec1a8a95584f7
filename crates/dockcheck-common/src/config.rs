//! Configuration model for a verification run.
//!
//! A [`HarnessConfig`] is resolved once at the process boundary (defaults,
//! then an optional YAML file, then command-line overrides) and threaded
//! through the harness as an immutable value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HarnessError, Result};
use crate::types::EnvBindings;

/// Inter-attempt delay growth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Sleep `base_delay` between every attempt.
    #[default]
    Fixed,
    /// Double the delay after each attempt, capped at `max_delay`.
    Exponential,
}

/// Serializable attempt budget for one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSpec {
    /// Maximum number of attempts (at least one).
    pub max_attempts: u32,
    /// Delay slept after a failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for the delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Delay growth policy.
    pub backoff: Backoff,
}

impl BudgetSpec {
    /// A fixed-delay budget.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let ms = duration_ms(delay);
        Self {
            max_attempts,
            base_delay_ms: ms,
            max_delay_ms: ms,
            backoff: Backoff::Fixed,
        }
    }

    /// The delay slept after a failed attempt.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// The upper bound for any single delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for BudgetSpec {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay_ms: 10_000,
            max_delay_ms: 20_000,
            backoff: Backoff::Fixed,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Attempt budgets for each readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeBudgets {
    /// Server endpoint availability (seconds to converge).
    pub endpoint_up: BudgetSpec,
    /// Worker registration (tens of seconds to converge).
    pub node_count: BudgetSpec,
    /// Unit-of-work completion (minutes to converge).
    pub terminal_state: BudgetSpec,
}

impl Default for ProbeBudgets {
    fn default() -> Self {
        Self {
            endpoint_up: BudgetSpec::default(),
            node_count: BudgetSpec::default(),
            terminal_state: BudgetSpec {
                max_attempts: 25,
                base_delay_ms: 20_000,
                max_delay_ms: 20_000,
                backoff: Backoff::Fixed,
            },
        }
    }
}

/// Server container settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Repo-tag fragment selecting the server image.
    pub image_filter: String,
    /// Host address used to reach published ports.
    pub host: String,
    /// Host port for the server's HTTP port.
    pub http_host_port: u16,
    /// Host port for the server's HTTPS port.
    pub https_host_port: u16,
    /// Directory copied into a staged volume mounted at the data directory.
    pub fixture_dir: Option<PathBuf>,
    /// Pipeline the fixture configuration defines, served once the server is up.
    pub fixture_pipeline: Option<String>,
    /// Extra environment passed to the server container.
    pub env: EnvBindings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            image_filter: constants::DEFAULT_SERVER_IMAGE_FILTER.into(),
            host: constants::DEFAULT_HOST.into(),
            http_host_port: constants::DEFAULT_HTTP_HOST_PORT,
            https_host_port: constants::DEFAULT_HTTPS_HOST_PORT,
            fixture_dir: None,
            fixture_pipeline: None,
            env: EnvBindings::new(),
        }
    }
}

impl ServerSettings {
    /// Base URL of the management interface as seen from the host.
    #[must_use]
    pub fn management_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.host,
            self.http_host_port,
            constants::SERVER_CONTEXT_PATH
        )
    }
}

/// Worker container settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Repo-tag fragment selecting worker images.
    pub image_filter: String,
    /// Shared registration secret. A fresh one is generated per run when unset.
    pub registration_key: Option<String>,
    /// Wait for each activated worker to register before dispatching work.
    pub await_registration: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            image_filter: constants::DEFAULT_AGENT_IMAGE_FILTER.into(),
            registration_key: None,
            await_registration: true,
        }
    }
}

/// Root configuration for a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Server container settings.
    pub server: ServerSettings,
    /// Worker container settings.
    pub workers: WorkerSettings,
    /// Per-probe attempt budgets.
    pub budgets: ProbeBudgets,
    /// Whole-run deadline in seconds, checked at every stage boundary and
    /// before every retry sleep.
    pub deadline_secs: Option<u64>,
    /// Stop polling a unit of work as soon as it reports a terminal failure.
    pub fail_fast: bool,
    /// Plugin ids the server is expected to have installed.
    pub expected_plugins: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            workers: WorkerSettings::default(),
            budgets: ProbeBudgets::default(),
            deadline_secs: None,
            fail_fast: true,
            expected_plugins: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Loads a configuration file, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarnessError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| HarnessError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] when a budget is empty or its base
    /// delay exceeds its maximum delay.
    pub fn validate(&self) -> Result<()> {
        for (name, budget) in [
            ("endpoint_up", &self.budgets.endpoint_up),
            ("node_count", &self.budgets.node_count),
            ("terminal_state", &self.budgets.terminal_state),
        ] {
            if budget.max_attempts == 0 {
                return Err(HarnessError::Config {
                    message: format!("budgets.{name}.max_attempts must be at least 1"),
                });
            }
            if budget.base_delay_ms > budget.max_delay_ms {
                return Err(HarnessError::Config {
                    message: format!(
                        "budgets.{name}: base_delay_ms ({}) exceeds max_delay_ms ({})",
                        budget.base_delay_ms, budget.max_delay_ms
                    ),
                });
            }
        }
        Ok(())
    }

    /// The whole-run deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Reads a single string value from a JSON version file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not JSON, or lacks `key`.
pub fn read_version_key(path: &Path, key: &str) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| HarnessError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let doc: serde_json::Value = serde_json::from_str(&content)?;
    match doc.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(HarnessError::NotFound {
            kind: "version key",
            id: key.to_string(),
        }),
    }
}
