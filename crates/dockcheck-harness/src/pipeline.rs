//! Unit-of-work definitions submitted to the server.
//!
//! A pipeline is a named sequence of stages; each stage holds jobs and each
//! job a list of tasks. The types serialize to the JSON shape the pipeline
//! administration endpoint accepts.

use std::path::Path;

use dockcheck_common::error::{HarnessError, Result};
use dockcheck_probe::api::StageInstance;
use serde::{Deserialize, Serialize};

/// Group the default pipeline is registered in.
pub const DEFAULT_GROUP: &str = "first";
/// Name of the default pipeline.
pub const DEFAULT_PIPELINE: &str = "new_pipeline";
/// Repository the default pipeline uses as its material.
pub const DEFAULT_MATERIAL_URL: &str = "https://github.com/gocd-contrib/elastic-agent-skeleton-plugin";

/// A pipeline registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline group.
    pub group: String,
    /// The pipeline itself.
    pub pipeline: Pipeline,
}

/// Pipeline body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name.
    pub name: String,
    /// Source materials triggering the pipeline.
    pub materials: Vec<Material>,
    /// Stages, run in order.
    pub stages: Vec<StageDefinition>,
}

/// A source material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    /// Material kind (`git`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific attributes.
    pub attributes: MaterialAttributes,
}

/// Attributes of a material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialAttributes {
    /// Repository URL.
    pub url: String,
}

/// A stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage name.
    pub name: String,
    /// Jobs run by the stage.
    pub jobs: Vec<JobDefinition>,
}

/// A job of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Job name.
    pub name: String,
    /// Resources a worker must advertise to be assigned the job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// Tasks run by the job.
    pub tasks: Vec<TaskDefinition>,
}

/// A task of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "attributes", rename_all = "lowercase")]
pub enum TaskDefinition {
    /// Runs a command on the worker.
    Exec {
        /// Executable.
        command: String,
        /// Arguments.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        arguments: Vec<String>,
    },
}

impl TaskDefinition {
    /// An exec task without arguments.
    #[must_use]
    pub fn exec(command: impl Into<String>) -> Self {
        Self::Exec {
            command: command.into(),
            arguments: Vec::new(),
        }
    }
}

impl JobDefinition {
    /// A job with no tasks and no resource constraint.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Restricts the job to workers advertising `resource`.
    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// Appends a task.
    #[must_use]
    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }
}

impl StageDefinition {
    /// A stage with no jobs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    /// Appends a job.
    #[must_use]
    pub fn job(mut self, job: JobDefinition) -> Self {
        self.jobs.push(job);
        self
    }
}

impl PipelineDefinition {
    /// An empty pipeline in `group`.
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            pipeline: Pipeline {
                name: name.into(),
                materials: Vec::new(),
                stages: Vec::new(),
            },
        }
    }

    /// Adds a git material.
    #[must_use]
    pub fn git(mut self, url: impl Into<String>) -> Self {
        self.pipeline.materials.push(Material {
            kind: "git".into(),
            attributes: MaterialAttributes { url: url.into() },
        });
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.pipeline.stages.push(stage);
        self
    }

    /// Reads a definition from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or
    /// defines no stage.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarnessError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let definition: Self = serde_json::from_str(&content)?;
        if definition.first_stage().is_none() {
            return Err(HarnessError::Config {
                message: format!("pipeline '{}' defines no stage", definition.name()),
            });
        }
        Ok(definition)
    }

    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.pipeline.name
    }

    /// Name of the first stage, whose result decides a run's outcome.
    #[must_use]
    pub fn first_stage(&self) -> Option<&str> {
        self.pipeline.stages.first().map(|s| s.name.as_str())
    }

    /// Identity of the first stage of the `counter`-th pipeline run.
    #[must_use]
    pub fn instance(&self, counter: u32) -> Option<StageInstance> {
        self.first_stage().map(|stage| StageInstance {
            pipeline: self.name().to_string(),
            stage: stage.to_string(),
            counter,
            stage_counter: 1,
        })
    }
}

impl Default for PipelineDefinition {
    /// One stage with one job listing the working directory. The job has
    /// no resource constraint, so any registered worker can pick it up.
    fn default() -> Self {
        Self::new(DEFAULT_GROUP, DEFAULT_PIPELINE)
            .git(DEFAULT_MATERIAL_URL)
            .stage(
                StageDefinition::new("stage1")
                    .job(JobDefinition::new("job0").task(TaskDefinition::exec("ls"))),
            )
    }
}
