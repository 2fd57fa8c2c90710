//! Local shell executor
//!
//! A minimal [`Executor`] that runs the job's script steps sequentially in
//! local shells. Action (`uses`) steps are not resolved here: they are
//! reported and recorded as successful so a mixed job is not failed
//! spuriously. Containers, expressions, and matrix expansion are likewise
//! left to richer engines behind the same trait.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::context::{ExecutionState, RunContext};
use crate::executor::{Executor, LogEntry, LogSink};
use crate::model::Step;

/// Executes script steps with local shells.
#[derive(Debug, Default)]
pub struct ShellExecutor {}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {}
    }

    fn shell_command(step: &Step, defaults_shell: Option<&str>) -> (String, Vec<String>) {
        let shell = if !step.shell.is_empty() {
            step.shell.clone()
        } else {
            defaults_shell.unwrap_or("sh").to_string()
        };
        (shell, vec!["-c".to_string()])
    }

    async fn run_script_step(
        &self,
        ctx: &RunContext,
        step: &Step,
        script: &str,
        sink: &mut (dyn LogSink + Send),
    ) -> Result<bool> {
        let (shell, mut args) = Self::shell_command(
            step,
            ctx.workflow.defaults.run.shell.as_deref(),
        );
        args.push(script.to_string());

        let mut env: HashMap<String, String> = ctx.env.clone();
        env.extend(step.env.clone());

        let workdir = if !step.working_directory.is_empty() {
            step.working_directory.clone()
        } else if let Some(dir) = &ctx.workflow.defaults.run.working_directory {
            dir.clone()
        } else {
            ctx.config.workdir.clone()
        };

        let mut command = Command::new(&shell);
        command
            .args(&args)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());
        if !workdir.is_empty() {
            command.current_dir(&workdir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn shell {shell}"))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;
        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_lines.next_line(), if stdout_open => match line? {
                    Some(line) => sink.observe(&LogEntry::line(line)).await,
                    None => stdout_open = false,
                },
                line = stderr_lines.next_line(), if stderr_open => match line? {
                    Some(line) => sink.observe(&LogEntry::line(line)).await,
                    None => stderr_open = false,
                },
            }
        }

        let status = if step.timeout_minutes > 0 {
            let limit = Duration::from_secs(step.timeout_minutes as u64 * 60);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("step {} exceeded its {}m timeout", step.id, step.timeout_minutes);
                    child.kill().await.ok();
                    sink.observe(&LogEntry::line(format!(
                        "step timed out after {} minute(s)",
                        step.timeout_minutes
                    )))
                    .await;
                    return Ok(false);
                }
            }
        } else {
            child.wait().await?
        };

        if !status.success() {
            sink.observe(&LogEntry::line(format!(
                "Process exited with status {}",
                status.code().unwrap_or(-1)
            )))
            .await;
        }
        Ok(status.success())
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(
        &self,
        ctx: &RunContext,
        state: Arc<ExecutionState>,
        sink: &mut (dyn LogSink + Send),
    ) -> Result<()> {
        let job = ctx
            .job()
            .with_context(|| format!("job {} not present in workflow", ctx.job_id))?
            .clone();

        for step in &job.steps {
            state.set_current_step(step.id.clone());
            debug!("running step {}", step.id);

            let success = match (&step.run, &step.uses) {
                (Some(script), _) => self.run_script_step(ctx, step, script, sink).await?,
                (None, Some(uses)) => {
                    sink.observe(&LogEntry::line(format!(
                        "action steps are not supported by the shell executor, skipping {uses}"
                    )))
                    .await;
                    true
                }
                (None, None) => true,
            };

            let effective = success || step.continue_on_error;
            state.record_result(step.id.clone(), effective);
            if !effective {
                break;
            }
        }
        Ok(())
    }
}
