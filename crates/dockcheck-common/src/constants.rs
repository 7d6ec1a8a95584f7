//! System-wide constants and defaults.

/// Repo-tag fragment identifying the server image.
pub const DEFAULT_SERVER_IMAGE_FILTER: &str = "gocd-server";

/// Repo-tag fragment identifying worker (agent) images.
pub const DEFAULT_AGENT_IMAGE_FILTER: &str = "gocd-agent";

/// Container port serving plain HTTP.
pub const SERVER_HTTP_PORT: &str = "8153/tcp";
/// Container port serving HTTPS, used by workers to reach the server.
pub const SERVER_HTTPS_PORT: &str = "8154/tcp";
/// Numeric form of [`SERVER_HTTPS_PORT`].
pub const SERVER_HTTPS_PORT_NUMBER: u16 = 8154;

/// Default host port the server HTTP port is published on.
pub const DEFAULT_HTTP_HOST_PORT: u16 = 8253;
/// Default host port the server HTTPS port is published on.
pub const DEFAULT_HTTPS_HOST_PORT: u16 = 8254;

/// Default host address used to reach published ports.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Data directory inside the server container.
pub const SERVER_DATA_MOUNT: &str = "/godata";

/// Context path of the server's web application.
pub const SERVER_CONTEXT_PATH: &str = "/go";

/// Media type for pipeline administration calls.
pub const PIPELINES_MEDIA_TYPE: &str = "application/vnd.go.cd.v3+json";
/// Media type for the agents collection.
pub const AGENTS_MEDIA_TYPE: &str = "application/vnd.go.cd.v4+json";
/// Media type for the plugin inventory.
pub const PLUGIN_INFO_MEDIA_TYPE: &str = "application/vnd.go.cd.v2+json";

/// Stage result reported by the server for a passing stage.
pub const RESULT_PASSED: &str = "Passed";
/// Stage results that will never turn into [`RESULT_PASSED`].
pub const TERMINAL_FAILURE_RESULTS: &[&str] = &["Failed", "Cancelled"];

/// Worker environment: URL of the server.
pub const ENV_SERVER_URL: &str = "GO_SERVER_URL";
/// Worker environment: shared auto-registration secret.
pub const ENV_REGISTER_KEY: &str = "AGENT_AUTO_REGISTER_KEY";
/// Worker environment: hostname the worker registers under.
pub const ENV_REGISTER_HOSTNAME: &str = "AGENT_AUTO_REGISTER_HOSTNAME";
/// Worker environment: resources the worker advertises.
pub const ENV_REGISTER_RESOURCES: &str = "AGENT_AUTO_REGISTER_RESOURCES";

/// Container label holding the run identifier.
pub const LABEL_RUN: &str = "dockcheck.run";
/// Container label holding the container's role.
pub const LABEL_ROLE: &str = "dockcheck.role";

/// Directories expected inside a fresh server container's working directory.
pub const SERVER_CONTAINER_DIRS: &[&str] = &["go-working-dir", "godata"];

/// Directories the server creates in its bound data volume.
pub const SERVER_DATA_DIRS: &[&str] = &["addons", "config", "db", "logs", "plugins", "artifacts"];

/// Application name used in CLI output and container names.
pub const APP_NAME: &str = "dockcheck";

/// Environment variable pointing at the version file.
pub const VERSION_FILE_ENV: &str = "VERSION_FILE_LOCATION";

/// Default version file location.
pub const DEFAULT_VERSION_FILE: &str = "version.json";
