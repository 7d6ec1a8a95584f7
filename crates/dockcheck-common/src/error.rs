//! Unified error types for the dockcheck workspace.
//!
//! The variants follow the failure classes a verification run can hit:
//! transient failures never reach this type directly (the retry engine
//! absorbs them), while exhaustion, provisioning, submission, assertion
//! and verification failures are all fatal to the run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error used to carry the last underlying cause of a failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration {path}: {source}")]
    ConfigParse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The container runtime refused to create, start, stop or remove a resource.
    #[error("provisioning failed for {target}: {message}")]
    Provisioning {
        /// The resource being provisioned (e.g. `server`, `worker host-1`).
        target: String,
        /// Runtime-provided failure description.
        message: String,
    },

    /// A readiness probe consumed its whole attempt budget.
    #[error("{probe} not ready after {attempts} attempt(s) over {elapsed:.1?}: {last}")]
    Exhaustion {
        /// Name of the probe that gave up.
        probe: String,
        /// Number of attempts made.
        attempts: u32,
        /// Wall-clock time spent retrying.
        elapsed: Duration,
        /// The last observed failure.
        #[source]
        last: BoxError,
    },

    /// A readiness probe saw a failure that retrying cannot change.
    #[error("{probe} hit a terminal failure after {attempts} attempt(s) over {elapsed:.1?}: {last}")]
    TerminalFailure {
        /// Name of the probe that stopped.
        probe: String,
        /// Number of attempts made.
        attempts: u32,
        /// Wall-clock time spent retrying.
        elapsed: Duration,
        /// The terminal failure.
        #[source]
        last: BoxError,
    },

    /// A management API call returned a non-success status.
    #[error("{operation} rejected with HTTP {status}: {body}")]
    Submission {
        /// The management operation that failed.
        operation: String,
        /// HTTP status code returned by the server.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Observed state does not match expected state.
    #[error("assertion failed for {what}: expected {expected}, got {actual}")]
    Assertion {
        /// The property being asserted.
        what: String,
        /// Expected value.
        expected: String,
        /// Observed value.
        actual: String,
    },

    /// A worker's unit of work did not reach the passed state.
    #[error("verification failed on worker {worker}: {source}")]
    Verification {
        /// Hostname label of the worker.
        worker: String,
        /// Underlying failure.
        #[source]
        source: Box<HarnessError>,
    },

    /// The run was cancelled or overran its deadline.
    #[error("run aborted at {stage}: {reason}")]
    Aborted {
        /// Stage being entered, or the probe that was waiting.
        stage: String,
        /// Why the run stopped.
        reason: String,
    },

    /// An HTTP request could not be completed.
    #[error("request to {url} failed: {message}")]
    Http {
        /// Target URL.
        url: String,
        /// Transport-level failure description.
        message: String,
    },

    /// An HTTP request completed with an unexpected status code.
    #[error("unexpected HTTP {status} from {url}")]
    UnexpectedStatus {
        /// Target URL.
        url: String,
        /// Returned status code.
        status: u16,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HarnessError {
    /// Shorthand for a [`HarnessError::Provisioning`] error.
    pub fn provisioning(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`HarnessError::Assertion`] error.
    pub fn assertion(
        what: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::Assertion {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_message_reports_attempts_and_cause() {
        let err = HarnessError::Exhaustion {
            probe: "endpoint-up".into(),
            attempts: 3,
            elapsed: Duration::from_millis(1500),
            last: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("endpoint-up"));
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn assertion_message_reports_expected_and_actual() {
        let err = HarnessError::assertion("exposed ports", "[8153/tcp]", "[]");
        assert_eq!(
            err.to_string(),
            "assertion failed for exposed ports: expected [8153/tcp], got []"
        );
    }

    #[test]
    fn verification_keeps_source_chain() {
        let inner = HarnessError::provisioning("worker host-0", "no such image");
        let err = HarnessError::Verification {
            worker: "host-0".into(),
            source: Box::new(inner),
        };
        let source = std::error::Error::source(&err).expect("source present");
        assert!(source.to_string().contains("no such image"));
    }
}
