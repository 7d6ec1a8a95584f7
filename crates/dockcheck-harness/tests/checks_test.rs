//! Server check scenarios against an in-memory runtime.
//!
//! Each check provisions its own server container and must leave nothing
//! behind, whether its assertions hold or not.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use dockcheck_common::config::{BudgetSpec, HarnessConfig, ProbeBudgets};
use dockcheck_common::constants::SERVER_DATA_DIRS;
use dockcheck_common::error::HarnessError;
use dockcheck_common::types::ImageRef;
use dockcheck_harness::checks::ServerChecks;
use dockcheck_probe::fake::{Method, ScriptedHttp};
use dockcheck_runtime::backend::ProcessEntry;
use dockcheck_runtime::exec::ExecOutput;
use dockcheck_runtime::fake::FakeRuntime;

const IMAGE: &str = "sha256:server";
const PLUGIN_INFO: &str = "/go/api/admin/plugin_info";

fn config(fixture: &Path) -> HarnessConfig {
    let mut config = HarnessConfig {
        budgets: ProbeBudgets {
            endpoint_up: BudgetSpec::fixed(3, Duration::ZERO),
            node_count: BudgetSpec::fixed(3, Duration::ZERO),
            terminal_state: BudgetSpec::fixed(3, Duration::ZERO),
        },
        ..HarnessConfig::default()
    };
    config.server.fixture_dir = Some(fixture.to_path_buf());
    config
}

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in SERVER_DATA_DIRS {
        std::fs::create_dir(dir.path().join(name)).unwrap();
    }
    dir
}

fn runtime() -> FakeRuntime {
    FakeRuntime::new()
        .with_image(IMAGE, "gocd/gocd-server:v17.3.0")
        .with_exposed_ports(&["8153/tcp", "8154/tcp"])
        .with_exec_output(ExecOutput {
            stdout: "go-working-dir\ngodata\n".into(),
            ..ExecOutput::default()
        })
        .with_processes(vec![
            ProcessEntry {
                pid: "1".into(),
                command: "/sbin/tini -- /docker-entrypoint.sh".into(),
            },
            ProcessEntry {
                pid: "97".into(),
                command: "java -Xms1g -Xmx2g -jar /go-server/go.jar".into(),
            },
        ])
}

fn server_up() -> ScriptedHttp {
    ScriptedHttp::new()
        .refuse_get("/go")
        .on_get("/go", 200, "")
        .on_get("/go/api/admin/pipelines/up42", 200, r#"{"name":"up42"}"#)
        .on_get(
            PLUGIN_INFO,
            200,
            r#"{"_embedded":{"plugin_info":[{"id":"yaml.config.plugin"},{"id":"github.pr"}]}}"#,
        )
}

// ── Passing checks ───────────────────────────────────────────────────

#[test]
fn all_checks_pass_and_release_their_containers() {
    let fixture = fixture();
    let mut config = config(fixture.path());
    config.server.fixture_pipeline = Some("up42".into());
    config.expected_plugins = vec!["github.pr".into()];
    let rt = runtime();
    let http = server_up();

    let outcomes = ServerChecks::new(&rt, &http, &config)
        .unwrap()
        .run_all(&ImageRef::new(IMAGE))
        .unwrap();

    let names: Vec<&str> = outcomes.iter().map(|o| o.name).collect();
    assert_eq!(names, ["container-layout", "bindings", "memory-settings"]);
    assert_eq!(rt.containers().len(), 3);
    assert!(rt.live_containers().is_empty());

    let config_requests = http
        .requests()
        .into_iter()
        .filter(|r| r.url.ends_with("/pipelines/up42"))
        .collect::<Vec<_>>();
    assert_eq!(config_requests.len(), 1);
    assert!(
        config_requests[0]
            .headers
            .iter()
            .any(|(k, v)| k == "Accept" && v == "application/vnd.go.cd.v3+json")
    );
}

#[test]
fn memory_check_passes_settings_through_env() {
    let fixture = fixture();
    let config = config(fixture.path());
    let rt = runtime();
    let http = server_up();

    let outcome = ServerChecks::new(&rt, &http, &config)
        .unwrap()
        .memory_settings(&ImageRef::new(IMAGE))
        .unwrap();

    assert_eq!(outcome.assertions, ["server runs with -Xms1g -Xmx2g"]);
    let spec = &rt.containers()[0].spec;
    assert_eq!(spec.env.get("SERVER_MEM"), Some("1g"));
    assert_eq!(spec.env.get("SERVER_MAX_MEM"), Some("2g"));
    assert!(spec.volumes.is_empty());
}

#[test]
fn layout_check_publishes_nothing() {
    let fixture = fixture();
    let config = config(fixture.path());
    let rt = runtime();
    let http = ScriptedHttp::new();

    let _ = ServerChecks::new(&rt, &http, &config)
        .unwrap()
        .container_layout(&ImageRef::new(IMAGE))
        .unwrap();

    let spec = &rt.containers()[0].spec;
    assert!(spec.ports.is_empty());
    assert!(spec.volumes.is_empty());
    assert_eq!(http.count(Method::Get, "/go"), 0);
}

// ── Failing checks ───────────────────────────────────────────────────

#[test]
fn unpopulated_data_directory_fails_bindings() {
    let empty = tempfile::tempdir().unwrap();
    let config = config(empty.path());
    let rt = runtime();
    let http = server_up();

    let err = ServerChecks::new(&rt, &http, &config)
        .unwrap()
        .bindings(&ImageRef::new(IMAGE))
        .unwrap_err();

    assert!(matches!(err, HarnessError::Assertion { .. }));
    assert!(rt.live_containers().is_empty());
}

#[test]
fn missing_plugin_fails_bindings() {
    let fixture = fixture();
    let mut config = config(fixture.path());
    config.expected_plugins = vec!["cd.go.contrib.elastic-agent.docker".into()];
    let rt = runtime();
    let http = server_up();

    let err = ServerChecks::new(&rt, &http, &config)
        .unwrap()
        .bindings(&ImageRef::new(IMAGE))
        .unwrap_err();

    assert!(err.to_string().contains("cd.go.contrib.elastic-agent.docker"));
    assert!(rt.live_containers().is_empty());
}

#[test]
fn silent_server_exhausts_and_is_removed() {
    let fixture = fixture();
    let config = config(fixture.path());
    let rt = runtime();
    let http = ScriptedHttp::new().refuse_get("/go");

    let err = ServerChecks::new(&rt, &http, &config)
        .unwrap()
        .memory_settings(&ImageRef::new(IMAGE))
        .unwrap_err();

    assert!(matches!(err, HarnessError::Exhaustion { attempts: 3, .. }));
    assert_eq!(http.count(Method::Get, "/go"), 3);
    assert!(rt.live_containers().is_empty());
}

#[test]
fn wrong_jvm_arguments_fail_memory_check() {
    let fixture = fixture();
    let config = config(fixture.path());
    let rt = runtime().with_processes(vec![ProcessEntry {
        pid: "97".into(),
        command: "java -Xms512m -jar /go-server/go.jar".into(),
    }]);
    let http = server_up();

    let err = ServerChecks::new(&rt, &http, &config)
        .unwrap()
        .memory_settings(&ImageRef::new(IMAGE))
        .unwrap_err();

    assert!(matches!(err, HarnessError::Assertion { .. }));
    assert!(rt.live_containers().is_empty());
}
