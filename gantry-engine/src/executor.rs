//! Executor boundary
//!
//! The runner drives an [`Executor`] and observes it through a [`LogSink`]:
//! every line the engine produces is handed to the sink synchronously, and
//! the sink may consult the shared [`ExecutionState`](crate::ExecutionState)
//! to attribute the line to the step currently executing.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::{ExecutionState, RunContext};

/// One line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
    /// Raw output is appended without a trailing newline.
    pub raw_output: bool,
}

impl LogEntry {
    pub fn line(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_output: false,
        }
    }

    pub fn raw(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_output: true,
        }
    }
}

/// Receives engine output as it is produced.
///
/// Observation is awaited so a sink may flush to the control plane with
/// back-pressure; a slow sink slows the engine rather than growing a
/// buffer without bound.
#[async_trait]
pub trait LogSink: Send {
    async fn observe(&mut self, entry: &LogEntry);
}

/// A workflow engine that can execute one prepared run.
///
/// Implementations update the shared state as they go: set the current
/// step before producing its output, record a result when it finishes,
/// and store any job outputs.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        ctx: &RunContext,
        state: Arc<ExecutionState>,
        sink: &mut (dyn LogSink + Send),
    ) -> Result<()>;
}
