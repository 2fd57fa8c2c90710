//! Workflow model
//!
//! The executor-facing representation of one job: its steps, containers,
//! and defaults. The runner's translator builds this from the wire job
//! request; container and defaults blocks arrive via JSON round-trips of
//! workflow-authored maps, so the serde names follow workflow spelling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A workflow holding the one job this run executes, plus stub jobs that
/// carry the outputs of upstream `needs` dependencies.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    pub name: String,
    pub defaults: Defaults,
    pub jobs: HashMap<String, WorkflowJob>,
}

/// One job of a workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowJob {
    pub name: String,
    pub runs_on: String,
    pub needs: Vec<String>,
    pub steps: Vec<Step>,
    /// Raw container node; an expression-bearing YAML tree until the
    /// executor evaluates it.
    pub container: serde_yaml::Value,
    pub services: HashMap<String, ContainerSpec>,
    pub outputs: HashMap<String, String>,
}

impl WorkflowJob {
    /// A placeholder for an upstream job: only its outputs matter, so
    /// `needs.<job>.outputs.<key>` expressions can resolve.
    pub fn outputs_stub(outputs: HashMap<String, String>) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }
}

/// One step of a job. Either `run` (script step) or `uses` (action step)
/// is set, never both.
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub id: String,
    pub if_condition: String,
    pub name: String,
    pub run: Option<String>,
    pub uses: Option<String>,
    pub working_directory: String,
    pub shell: String,
    pub with: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub continue_on_error: bool,
    pub timeout_minutes: i64,
}

impl Step {
    /// The human-facing label: explicit name, else the action reference,
    /// else the script.
    pub fn display(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        self.run.clone().unwrap_or_default()
    }
}

/// A container specification, as authored in workflow YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub args: String,
}

/// Workflow-level defaults, merged from the wire `defaults[]` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub run: RunDefaults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(
        rename = "working-directory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub working_directory: Option<String>,
}
