//! Client for the management interface of the server under test.

use std::fmt;

use dockcheck_common::constants::{AGENTS_MEDIA_TYPE, PIPELINES_MEDIA_TYPE, PLUGIN_INFO_MEDIA_TYPE};
use dockcheck_common::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};

use crate::http::{HttpClient, HttpResponse};

const JSON: &str = "application/json";
const CONFIRM: (&str, &str) = ("Confirm", "true");

/// Outcome of a state-changing management call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The server accepted the request.
    Accepted(u16),
    /// The server reported the change was already in effect.
    AlreadyDone(u16),
}

/// Identifies one run of one stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInstance {
    /// Pipeline name.
    pub pipeline: String,
    /// Stage name.
    pub stage: String,
    /// Pipeline run counter (1-based).
    pub counter: u32,
    /// Stage re-run counter (1-based).
    pub stage_counter: u32,
}

impl fmt::Display for StageInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.pipeline, self.counter, self.stage, self.stage_counter
        )
    }
}

/// A worker as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Hostname the worker registered under.
    pub hostname: String,
}

#[derive(Deserialize)]
struct Embedded<T> {
    #[serde(rename = "_embedded")]
    embedded: T,
}

#[derive(Deserialize)]
struct Agents {
    agents: Vec<AgentSummary>,
}

#[derive(Deserialize)]
struct PluginInfos {
    plugin_info: Vec<PluginInfo>,
}

#[derive(Deserialize)]
struct PluginInfo {
    id: String,
}

#[derive(Deserialize)]
struct StageResult {
    result: Option<String>,
}

/// Typed view of the server's management endpoints.
pub struct ServerApi<'h> {
    http: &'h dyn HttpClient,
    base_url: String,
}

impl<'h> ServerApi<'h> {
    /// Creates a client rooted at `base_url` (e.g. `http://0.0.0.0:8253/go`).
    #[must_use]
    pub fn new(http: &'h dyn HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Fetches the configuration of a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnexpectedStatus`] if the server does not
    /// serve the pipeline, or a transport error.
    pub fn pipeline_config(&self, name: &str) -> Result<HttpResponse> {
        let url = self.url(&format!("/api/admin/pipelines/{name}"));
        let response = self.http.get(&url, &[("Accept", PIPELINES_MEDIA_TYPE)])?;
        require_ok(url, response)
    }

    /// Registers a pipeline definition.
    ///
    /// A definition that already exists is reported as
    /// [`Submission::AlreadyDone`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Submission`] for any other non-success status.
    pub fn create_pipeline<T: Serialize>(&self, definition: &T) -> Result<Submission> {
        let body = serde_json::to_value(definition)?;
        let response = self.http.post(
            &self.url("/api/admin/pipelines"),
            Some(&body),
            &[("Accept", PIPELINES_MEDIA_TYPE), ("Content-Type", JSON)],
        )?;
        classify("create pipeline", &response, &[409, 422])
    }

    /// Unpauses a pipeline so it can be scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Submission`] on an unexpected status.
    pub fn unpause(&self, name: &str) -> Result<Submission> {
        let response = self.http.post(
            &self.url(&format!("/api/pipelines/{name}/unpause")),
            None,
            &[CONFIRM],
        )?;
        classify("unpause pipeline", &response, &[409])
    }

    /// Triggers a run of a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Submission`] on an unexpected status.
    pub fn schedule(&self, name: &str) -> Result<Submission> {
        let response = self.http.post(
            &self.url(&format!("/api/pipelines/{name}/schedule")),
            None,
            &[CONFIRM],
        )?;
        classify("schedule pipeline", &response, &[409])
    }

    /// Fetches the result of a stage instance (`None` while it has no result).
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnexpectedStatus`] if the instance does not
    /// exist yet, or a transport error.
    pub fn stage_result(&self, instance: &StageInstance) -> Result<Option<String>> {
        let url = self.url(&format!(
            "/api/stages/{}/{}/instance/{}/{}",
            instance.pipeline, instance.stage, instance.counter, instance.stage_counter
        ));
        let response = self.http.get(&url, &[])?;
        let response = require_ok(url, response)?;
        Ok(response.json::<StageResult>()?.result)
    }

    /// Lists registered workers.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, unexpected status, or a
    /// malformed collection.
    pub fn agents(&self) -> Result<Vec<AgentSummary>> {
        let url = self.url("/api/agents");
        let response = self.http.get(&url, &[("Accept", AGENTS_MEDIA_TYPE)])?;
        let response = require_ok(url, response)?;
        Ok(response.json::<Embedded<Agents>>()?.embedded.agents)
    }

    /// Lists the ids of installed plugins.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, unexpected status, or a
    /// malformed inventory.
    pub fn plugin_ids(&self) -> Result<Vec<String>> {
        let url = self.url("/api/admin/plugin_info");
        let response = self.http.get(&url, &[("Accept", PLUGIN_INFO_MEDIA_TYPE)])?;
        let response = require_ok(url, response)?;
        Ok(response
            .json::<Embedded<PluginInfos>>()?
            .embedded
            .plugin_info
            .into_iter()
            .map(|p| p.id)
            .collect())
    }
}

fn require_ok(url: String, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(HarnessError::UnexpectedStatus {
            url,
            status: response.status,
        })
    }
}

fn classify(operation: &str, response: &HttpResponse, duplicate: &[u16]) -> Result<Submission> {
    if response.is_success() {
        tracing::info!(operation, status = response.status, "accepted");
        Ok(Submission::Accepted(response.status))
    } else if duplicate.contains(&response.status) {
        tracing::info!(operation, status = response.status, body = %response.body, "already in effect");
        Ok(Submission::AlreadyDone(response.status))
    } else {
        Err(HarnessError::Submission {
            operation: operation.to_string(),
            status: response.status,
            body: response.body.clone(),
        })
    }
}
