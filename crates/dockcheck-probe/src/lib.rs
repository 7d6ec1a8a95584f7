//! # dockcheck-probe
//!
//! Readiness checks against the server under test.
//!
//! - [`http`]: the HTTP client seam and its `reqwest` implementation.
//! - [`api`]: typed calls to the server's management interface.
//! - [`probes`]: endpoint, node-count and terminal-state probes, run
//!   through the retry engine with their own attempt budgets.
//! - `fake`: a scripted HTTP client for tests, behind the `testing`
//!   feature.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod api;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod http;
pub mod probes;
