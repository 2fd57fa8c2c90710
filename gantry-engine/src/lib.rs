//! Gantry Engine
//!
//! The boundary between the runner and the workflow engine that actually
//! executes jobs.
//!
//! This crate contains:
//! - Model: the job/step/container representation an executor consumes
//! - Context: the per-run configuration and shared execution state
//! - Executor: the trait the runner drives, plus a local shell executor
//!
//! Workflow semantics (expression evaluation, matrix expansion, action
//! resolution) belong to executor implementations, not to this crate.

pub mod context;
pub mod executor;
pub mod model;
pub mod shell;

pub use context::{ExecutionState, RunConfig, RunContext, StepResult};
pub use executor::{Executor, LogEntry, LogSink};
pub use model::{ContainerSpec, Defaults, Step, Workflow, WorkflowJob};
pub use shell::ShellExecutor;
