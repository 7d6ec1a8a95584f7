//! End-to-end tests for the verification workflow.
//!
//! Every run goes through the real state machine against an in-memory
//! container runtime and a scripted management API:
//! 1. Happy paths (no workers, one worker, eight workers)
//! 2. Readiness exhaustion and per-worker verification failures
//! 3. Idempotent submission and dispatch
//! 4. Provisioning failures, cancellation, and guaranteed teardown

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use dockcheck_common::config::{BudgetSpec, HarnessConfig, ProbeBudgets};
use dockcheck_common::constants::{ENV_REGISTER_HOSTNAME, ENV_SERVER_URL};
use dockcheck_common::error::{HarnessError, Result};
use dockcheck_harness::stage::{CancelToken, Stage};
use dockcheck_harness::workflow::{RunFailure, RunReport, Workflow};
use dockcheck_probe::fake::{Method, ScriptedHttp};
use dockcheck_probe::http::{HttpClient, HttpResponse};
use dockcheck_runtime::fake::{FakeRuntime, RuntimeCall};

const AGENTS: &str = "/go/api/agents";
const PIPELINES: &str = "/go/api/admin/pipelines";
const UNPAUSE: &str = "/go/api/pipelines/new_pipeline/unpause";
const SCHEDULE: &str = "/go/api/pipelines/new_pipeline/schedule";

fn config() -> HarnessConfig {
    HarnessConfig {
        budgets: ProbeBudgets {
            endpoint_up: BudgetSpec::fixed(3, Duration::ZERO),
            node_count: BudgetSpec::fixed(3, Duration::ZERO),
            terminal_state: BudgetSpec::fixed(5, Duration::ZERO),
        },
        ..HarnessConfig::default()
    }
}

fn runtime(workers: usize) -> FakeRuntime {
    (0..workers).fold(
        FakeRuntime::new().with_image("sha256:server", "gocd/gocd-server:v17.3.0"),
        |rt, i| {
            rt.with_image(
                &format!("sha256:agent{i}"),
                &format!("gocd/gocd-agent-{i}:v17.3.0"),
            )
        },
    )
}

fn stage(counter: usize) -> String {
    format!("/go/api/stages/new_pipeline/stage1/instance/{counter}/1")
}

fn agents_body(n: usize) -> String {
    let agents: Vec<String> = (0..n)
        .map(|i| format!(r#"{{"hostname":"host-{i}","resources":["foo{i}"]}}"#))
        .collect();
    format!(r#"{{"_embedded":{{"agents":[{}]}}}}"#, agents.join(","))
}

/// A server that is up, accepts the pipeline, and registers one more worker
/// each time the agent list is read.
fn healthy_server(workers: usize) -> ScriptedHttp {
    let mut http = ScriptedHttp::new()
        .on_get("/go", 200, "<html/>")
        .on_post(PIPELINES, 200, "{}")
        .on_post(UNPAUSE, 200, "")
        .on_post(SCHEDULE, 202, "");
    for n in 1..=workers.max(1) {
        http = http.on_get(AGENTS, 200, &agents_body(n));
    }
    http
}

fn passes(http: ScriptedHttp, counters: std::ops::RangeInclusive<usize>) -> ScriptedHttp {
    counters.fold(http, |h, c| h.on_get(&stage(c), 200, r#"{"result":"Passed"}"#))
}

fn run(
    rt: &FakeRuntime,
    http: &dyn HttpClient,
    config: &HarnessConfig,
) -> std::result::Result<RunReport, Box<RunFailure>> {
    let workflow = Workflow::new(rt, http, config).expect("valid config");
    let plan = workflow.plan().expect("server image present");
    workflow.run(plan)
}

fn removed_ids(rt: &FakeRuntime) -> Vec<String> {
    rt.calls()
        .into_iter()
        .filter_map(|c| match c {
            RuntimeCall::Remove(id) => Some(id.to_string()),
            _ => None,
        })
        .collect()
}

// ── Happy paths ──────────────────────────────────────────────────────

#[test]
fn server_without_workers_passes_first_instance() {
    let rt = runtime(0);
    let http = ScriptedHttp::new()
        .on_get("/go", 200, "")
        .on_post(PIPELINES, 200, "{}")
        .on_post(UNPAUSE, 200, "")
        .on_post(SCHEDULE, 202, "")
        .on_get(&stage(1), 404, "")
        .on_get(&stage(1), 200, r#"{"result":"Unknown"}"#)
        .on_get(&stage(1), 200, r#"{"result":"Passed"}"#);

    let report = run(&rt, &http, &config()).expect("run should pass");

    assert_eq!(report.worker_count, 0);
    assert!(report.verified_workers.is_empty());
    assert_eq!(
        report.stages,
        vec![
            Stage::ProvisionServer,
            Stage::AwaitServerReady,
            Stage::ProvisionWorkers,
            Stage::SubmitWork,
            Stage::Dispatch(0),
            Stage::AwaitCompletion(0),
            Stage::Teardown,
        ]
    );
    assert_eq!(http.count(Method::Get, &stage(1)), 3);
    assert_eq!(report.teardown.removed, vec!["server"]);
    assert_eq!(report.teardown.staged_dirs_removed, 1);
    assert!(rt.live_containers().is_empty());
}

#[test]
fn node_count_tracks_discovered_workers() {
    for n in [1, 8] {
        let rt = runtime(n);
        let http = passes(healthy_server(n), 1..=n);

        let report = run(&rt, &http, &config()).expect("run should pass");

        assert_eq!(report.worker_count, n);
        assert_eq!(report.verified_workers.len(), n);
        assert_eq!(report.verified_workers[n - 1], format!("host-{}", n - 1));
        // One registration check per activation, each satisfied at once.
        assert_eq!(http.count(Method::Get, AGENTS), n);
        assert!(rt.live_containers().is_empty());
    }
}

#[test]
fn workers_are_pointed_at_the_server() {
    let rt = runtime(2);
    let http = passes(healthy_server(2), 1..=2);
    run(&rt, &http, &config()).expect("run should pass");

    let containers = rt.containers();
    let server_url = "https://172.17.0.2:8154/go";
    for (i, worker) in containers[1..].iter().enumerate() {
        assert_eq!(worker.spec.env.get(ENV_SERVER_URL), Some(server_url));
        let hostname = format!("host-{i}");
        assert_eq!(worker.spec.env.get(ENV_REGISTER_HOSTNAME), Some(hostname.as_str()));
        let role = worker.spec.labels.get("dockcheck.role");
        assert_eq!(role.map(String::as_str), Some("worker"));
    }
}

#[test]
fn workers_are_activated_one_at_a_time() {
    let rt = runtime(2);
    let http = passes(healthy_server(2), 1..=2);
    run(&rt, &http, &config()).expect("run should pass");

    let ids: Vec<_> = rt.containers().iter().map(|c| c.id.clone()).collect();
    let calls = rt.calls();
    let position = |call: &RuntimeCall| calls.iter().position(|c| c == call).unwrap();
    let first_retired = position(&RuntimeCall::Remove(ids[1].clone()));
    let second_started = position(&RuntimeCall::Start(ids[2].clone()));
    assert!(first_retired < second_started);
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn unreachable_server_never_provisions_workers() {
    let rt = runtime(2);
    let http = ScriptedHttp::new().refuse_get("/go");

    let failure = run(&rt, &http, &config()).expect_err("run should fail");

    assert_eq!(failure.stage, Stage::AwaitServerReady);
    assert!(matches!(
        failure.error,
        HarnessError::Exhaustion { ref probe, attempts: 3, .. } if probe == "endpoint-up"
    ));
    assert!(!failure.report.stages.contains(&Stage::ProvisionWorkers));
    assert_eq!(rt.containers().len(), 1);
    assert_eq!(failure.report.teardown.removed, vec!["server"]);
    assert!(rt.live_containers().is_empty());
}

#[test]
fn second_of_three_workers_failing_is_attributed_and_cleaned_up() {
    let rt = runtime(3);
    let http = passes(healthy_server(3), 1..=1)
        .on_get(&stage(2), 200, r#"{"result":"Unknown"}"#);

    let failure = run(&rt, &http, &config()).expect_err("run should fail");

    assert_eq!(failure.stage, Stage::AwaitCompletion(1));
    match &failure.error {
        HarnessError::Verification { worker, source } => {
            assert_eq!(worker, "host-1");
            assert!(matches!(**source, HarnessError::Exhaustion { attempts: 5, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(failure.report.verified_workers, vec!["host-0"]);

    // host-0 was retired before host-1 started; host-2 never started.
    let started: Vec<_> = rt.started_images().iter().map(|i| i.to_string()).collect();
    assert_eq!(started, vec!["sha256:server", "sha256:agent0", "sha256:agent1"]);
    assert_eq!(failure.report.teardown.removed, vec!["host-2", "host-1", "server"]);
    assert!(rt.live_containers().is_empty());
}

#[test]
fn failed_stage_stops_early_with_fail_fast() {
    let rt = runtime(1);
    let http = healthy_server(1).on_get(&stage(1), 200, r#"{"result":"Failed"}"#);

    let failure = run(&rt, &http, &config()).expect_err("run should fail");

    match &failure.error {
        HarnessError::Verification { source, .. } => {
            assert!(matches!(**source, HarnessError::TerminalFailure { attempts: 1, .. }));
            assert!(source.to_string().contains("terminal failure"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(http.count(Method::Get, &stage(1)), 1);
    assert!(rt.live_containers().is_empty());
}

#[test]
fn failed_stage_is_polled_to_exhaustion_without_fail_fast() {
    let rt = runtime(1);
    let http = healthy_server(1).on_get(&stage(1), 200, r#"{"result":"Failed"}"#);
    let config = HarnessConfig {
        fail_fast: false,
        ..config()
    };

    let failure = run(&rt, &http, &config).expect_err("run should fail");

    assert!(failure.error.to_string().contains("5 attempt(s)"));
    assert_eq!(http.count(Method::Get, &stage(1)), 5);
}

#[test]
fn unregistered_worker_fails_activation() {
    let rt = runtime(1);
    let http = passes(
        ScriptedHttp::new()
            .on_get("/go", 200, "")
            .on_post(PIPELINES, 200, "{}")
            .on_get(AGENTS, 200, &agents_body(0)),
        1..=1,
    );

    let failure = run(&rt, &http, &config()).expect_err("run should fail");

    assert_eq!(failure.stage, Stage::Activate(0));
    assert!(failure.error.to_string().contains("0 of 1 workers registered"));
    assert_eq!(http.count(Method::Post, SCHEDULE), 0);
    assert!(rt.live_containers().is_empty());
}

#[test]
fn rejected_submission_is_fatal() {
    let rt = runtime(1);
    let http = ScriptedHttp::new()
        .on_get("/go", 200, "")
        .on_post(PIPELINES, 500, "boom");

    let failure = run(&rt, &http, &config()).expect_err("run should fail");

    assert_eq!(failure.stage, Stage::SubmitWork);
    assert!(matches!(failure.error, HarnessError::Submission { status: 500, .. }));
    assert!(rt.started_images().iter().all(|i| i.as_str() == "sha256:server"));
    assert!(rt.live_containers().is_empty());
}

#[test]
fn rejected_worker_create_tears_down_earlier_containers() {
    let rt = runtime(3).fail_create("agent1");
    let http = healthy_server(3);

    let failure = run(&rt, &http, &config()).expect_err("run should fail");

    assert_eq!(failure.stage, Stage::ProvisionWorkers);
    assert!(matches!(
        failure.error,
        HarnessError::Provisioning { ref target, .. } if target == "worker host-1"
    ));
    assert_eq!(failure.report.teardown.removed, vec!["host-0", "server"]);
    assert!(rt.live_containers().is_empty());
}

// ── Idempotence ──────────────────────────────────────────────────────

#[test]
fn resubmitting_and_redispatching_is_tolerated() {
    let rt = runtime(2);
    let http = ScriptedHttp::new()
        .on_get("/go", 200, "")
        .on_post(
            PIPELINES,
            422,
            r#"{"message":"Failed to add pipeline. The pipeline 'new_pipeline' already exists."}"#,
        )
        .on_post(UNPAUSE, 409, "already unpaused")
        .on_post(SCHEDULE, 202, "")
        .on_post(SCHEDULE, 409, "already scheduled")
        .on_get(AGENTS, 200, &agents_body(1))
        .on_get(AGENTS, 200, &agents_body(2));
    let http = passes(http, 1..=2);

    let report = run(&rt, &http, &config()).expect("duplicates are not orchestration errors");

    assert_eq!(report.verified_workers, vec!["host-0", "host-1"]);
    assert_eq!(http.count(Method::Post, UNPAUSE), 2);
    assert_eq!(http.count(Method::Post, SCHEDULE), 2);
}

// ── Deadline ─────────────────────────────────────────────────────────

#[test]
fn deadline_cuts_a_long_wait_short() {
    let rt = runtime(1);
    let http = ScriptedHttp::new().refuse_get("/go");
    let config = HarnessConfig {
        deadline_secs: Some(1),
        budgets: ProbeBudgets {
            endpoint_up: BudgetSpec::fixed(20, Duration::from_millis(100)),
            ..config().budgets
        },
        ..config()
    };

    let started = std::time::Instant::now();
    let failure = run(&rt, &http, &config).expect_err("run should abort");

    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(failure.stage, Stage::AwaitServerReady);
    match &failure.error {
        HarnessError::Aborted { stage, reason } => {
            assert_eq!(stage, "AWAIT_SERVER_READY");
            assert!(reason.starts_with("endpoint-up: deadline reached"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(http.count(Method::Get, "/go") < 20);
    assert_eq!(failure.report.stages.last(), Some(&Stage::Teardown));
    assert_eq!(failure.report.teardown.removed, vec!["server"]);
    assert!(rt.live_containers().is_empty());
}

// ── Cancellation ─────────────────────────────────────────────────────

/// Cancels the run as soon as the unit of work has been submitted.
struct CancelOnSubmit {
    inner: ScriptedHttp,
    token: CancelToken,
}

impl HttpClient for CancelOnSubmit {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        self.inner.get(url, headers)
    }

    fn post(
        &self,
        url: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let response = self.inner.post(url, body, headers);
        if url.ends_with(PIPELINES) {
            self.token.cancel();
        }
        response
    }
}

#[test]
fn cancellation_aborts_at_next_boundary_and_tears_down() {
    let rt = runtime(2);
    let token = CancelToken::new();
    let http = CancelOnSubmit {
        inner: passes(healthy_server(2), 1..=2),
        token: token.clone(),
    };
    let config = config();
    let workflow = Workflow::new(&rt, &http, &config)
        .expect("valid config")
        .with_cancel(token);
    let plan = workflow.plan().expect("server image present");

    let failure = workflow.run(plan).expect_err("run should abort");

    assert_eq!(failure.stage, Stage::SubmitWork);
    assert!(matches!(
        failure.error,
        HarnessError::Aborted { ref stage, ref reason }
            if stage == "ACTIVATE[0]" && reason == "cancelled"
    ));
    assert_eq!(failure.report.stages.last(), Some(&Stage::Teardown));
    assert_eq!(removed_ids(&rt).len(), 3);
    assert!(rt.live_containers().is_empty());
    assert!(rt.started_images().iter().all(|i| i.as_str() == "sha256:server"));
}

#[test]
fn cancelled_before_start_creates_nothing() {
    let rt = runtime(1);
    let http = healthy_server(1);
    let token = CancelToken::new();
    token.cancel();
    let config = config();
    let workflow = Workflow::new(&rt, &http, &config)
        .expect("valid config")
        .with_cancel(token);
    let plan = workflow.plan().expect("server image present");

    let failure = workflow.run(plan).expect_err("run should abort");

    assert!(matches!(failure.error, HarnessError::Aborted { .. }));
    assert_eq!(failure.report.stages, vec![Stage::Teardown]);
    assert!(rt.containers().is_empty());
}
