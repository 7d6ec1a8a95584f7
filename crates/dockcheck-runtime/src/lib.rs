//! Container runtime access for the dockcheck harness.
//!
//! The harness only ever talks to a [`ContainerRuntime`]; the Docker CLI
//! backend drives a real daemon and `fake::FakeRuntime` (behind the
//! `testing` feature) records calls for deterministic tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod discovery;
pub mod exec;
#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use backend::{ContainerDetails, ContainerRuntime, ContainerSpec, ImageInfo, ProcessEntry};
pub use exec::ExecOutput;
