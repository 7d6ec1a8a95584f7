//! Formatted output helpers for CLI commands.
//!
//! Summaries go to stderr with ANSI styling; machine-readable output
//! goes to stdout.

#![allow(clippy::print_stderr)]

use std::time::Duration;

use dockcheck_harness::checks::CheckOutcome;
use dockcheck_harness::context::RunPlan;
use dockcheck_harness::stage::Stage;
use dockcheck_harness::teardown::TeardownSummary;
use dockcheck_harness::workflow::{RunFailure, RunReport};
use serde::Serialize;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Prints the banner.
pub fn print_header() {
    eprintln!();
    eprintln!("  {BOLD}dockcheck{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
}

/// Prints what a run is about to exercise.
pub fn print_plan(plan: &RunPlan) {
    eprintln!("  {DIM}run{RESET}      {}", plan.run_id);
    eprintln!("  {DIM}server{RESET}   {CYAN}{}{RESET}", plan.server_image);
    if plan.workers.is_empty() {
        eprintln!("  {DIM}workers{RESET}  {YELLOW}none found{RESET}");
    }
    for worker in &plan.workers {
        eprintln!(
            "  {DIM}worker{RESET}   {CYAN}{}{RESET} {DIM}as {}{RESET}",
            worker.image, worker.hostname
        );
    }
    eprintln!("  {DIM}pipeline{RESET} {}", plan.work.name());
    eprintln!();
}

/// Prints the summary of a passed run.
pub fn print_report(report: &RunReport) {
    eprintln!(
        "  {GREEN}{BOLD}passed{RESET} {} of {} worker(s) verified in {}",
        report.verified_workers.len(),
        report.worker_count,
        format_duration(report.elapsed)
    );
    eprintln!("  {DIM}{}{RESET}", format_stages(&report.stages));
    print_teardown(&report.teardown);
}

/// Prints the summary of a failed run.
pub fn print_failure(failure: &RunFailure) {
    eprintln!(
        "  {RED}{BOLD}failed{RESET} during {BOLD}{}{RESET} after {}",
        failure.stage,
        format_duration(failure.report.elapsed)
    );
    eprintln!("  {}", failure.error);
    if !failure.report.verified_workers.is_empty() {
        eprintln!(
            "  {DIM}verified before failure:{RESET} {}",
            failure.report.verified_workers.join(", ")
        );
    }
    eprintln!("  {DIM}{}{RESET}", format_stages(&failure.report.stages));
    print_teardown(&failure.report.teardown);
}

fn print_teardown(summary: &TeardownSummary) {
    let removed = if summary.removed.is_empty() {
        "nothing".to_string()
    } else {
        summary.removed.join(", ")
    };
    eprintln!("  {DIM}released{RESET} {removed}");
    for error in &summary.errors {
        eprintln!("  {YELLOW}leak:{RESET} {error}");
    }
    eprintln!();
}

/// Prints the outcome of every server check.
pub fn print_checks(outcomes: &[CheckOutcome]) {
    for outcome in outcomes {
        eprintln!("  {GREEN}ok{RESET}  {BOLD}{}{RESET}", outcome.name);
        for assertion in &outcome.assertions {
            eprintln!("      {DIM}{assertion}{RESET}");
        }
    }
    eprintln!();
}

/// Writes `value` as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized.
#[allow(clippy::print_stdout)]
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats a duration as seconds below a minute, minutes and seconds above.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Joins stage names into one arrow-separated line.
#[must_use]
pub fn format_stages(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
