//! Run context and shared execution state
//!
//! A [`RunContext`] is everything an executor needs to run one job. The
//! [`ExecutionState`] is the live side: which step is executing, how each
//! finished step ended, and the outputs the job produced. The runner's log
//! formatter reads the state on every observed line to detect step
//! transitions, so access is behind plain sync locks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::{Workflow, WorkflowJob};

/// The synthetic step that owns all pre-execution output.
pub const SETUP_STEP: &str = "__setup";

/// Static configuration for one run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub workdir: String,
    pub secrets: HashMap<String, String>,
    pub event_name: String,
    /// Host of the control plane, scheme stripped.
    pub github_instance: String,
}

/// Everything the executor consumes for one job.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub config: RunConfig,
    pub env: HashMap<String, String>,
    pub matrix: HashMap<String, serde_json::Value>,
    /// The `github.event` payload, serialized.
    pub event_json: String,
    /// The full `github` context, serialized.
    pub github_context: String,
    pub workflow: Workflow,
    pub job_id: String,
}

impl RunContext {
    /// The job this run executes.
    pub fn job(&self) -> Option<&WorkflowJob> {
        self.workflow.jobs.get(&self.job_id)
    }
}

/// How one step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    pub success: bool,
}

/// Live execution state shared between executor and observer.
#[derive(Debug, Default)]
pub struct ExecutionState {
    current_step: RwLock<String>,
    step_results: RwLock<HashMap<String, StepResult>>,
    outputs: RwLock<HashMap<String, String>>,
}

impl ExecutionState {
    /// Creates state positioned on the setup step, with setup pre-recorded
    /// as successful until something fails it.
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        *state.current_step.write().unwrap() = SETUP_STEP.to_string();
        state
            .step_results
            .write()
            .unwrap()
            .insert(SETUP_STEP.to_string(), StepResult { success: true });
        Arc::new(state)
    }

    pub fn current_step(&self) -> String {
        self.current_step.read().unwrap().clone()
    }

    pub fn set_current_step(&self, step: impl Into<String>) {
        *self.current_step.write().unwrap() = step.into();
    }

    pub fn record_result(&self, step: impl Into<String>, success: bool) {
        self.step_results
            .write()
            .unwrap()
            .insert(step.into(), StepResult { success });
    }

    pub fn step_result(&self, step: &str) -> Option<StepResult> {
        self.step_results.read().unwrap().get(step).copied()
    }

    /// True when every recorded step succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.step_results
            .read()
            .unwrap()
            .values()
            .all(|result| result.success)
    }

    pub fn set_output(&self, key: impl Into<String>, value: impl Into<String>) {
        self.outputs
            .write()
            .unwrap()
            .insert(key.into(), value.into());
    }

    pub fn outputs(&self) -> HashMap<String, String> {
        self.outputs.read().unwrap().clone()
    }
}
