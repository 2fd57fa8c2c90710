//! Message pump
//!
//! Long-polls the session's message queue and dispatches decoded job
//! requests onto their own tasks. The pump is the only consumer of the
//! queue: every received message is acknowledged by deletion before the
//! job starts, except the second job seen in run-once mode, which is left
//! unacknowledged so the server redelivers it elsewhere.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gantry_client::ClientError;
use gantry_core::message::{AgentJobRequest, BrokerMessage};

use crate::job::{self, JobDispatch};
use crate::session::{decrypt_envelope, RunnerSession};
use crate::token::with_auth_retry;

const JOB_REQUEST_TYPE: &str = "PipelineAgentJobRequest";

/// The long-running message loop of one session.
pub struct MessagePump {
    pub dispatch: JobDispatch,
    pub session: RunnerSession,
    pub run_once: bool,
}

/// True when a run-once pump must abort instead of accepting `message_type`.
///
/// The queue has no drain signal, so the second job request is the stop
/// condition; it must not be acknowledged, or the server would consider it
/// delivered.
fn aborts_run_once(run_once: bool, first_job_received: bool, message_type: &str) -> bool {
    run_once && first_job_received && message_type.eq_ignore_ascii_case(JOB_REQUEST_TYPE)
}

impl MessagePump {
    /// Polls until shutdown (or, in run-once mode, until the single job
    /// finished). In-flight jobs are joined before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut first_job_received = false;
        let mut jobs: Vec<JoinHandle<()>> = Vec::new();
        let (once_done_tx, mut once_done) = watch::channel(false);
        let session_id = self.session.session_id.to_string();

        loop {
            if *shutdown.borrow() || *once_done.borrow() {
                break;
            }

            let polled = tokio::select! {
                _ = shutdown.changed() => {
                    info!("stopping accepting new jobs");
                    break;
                }
                _ = once_done.changed() => {
                    info!("job finished in run-once mode, stopping the message loop");
                    break;
                }
                polled = self.poll_once(&session_id) => polled,
            };

            let message = match polled {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(ClientError::Http(e)) => {
                    warn!("failed to get message: {e}");
                    continue;
                }
                Err(e) => {
                    error!("failed to get message: {e}");
                    return Err(e.into());
                }
            };

            if aborts_run_once(self.run_once, first_job_received, &message.message_type) {
                warn!("received a second job in run-once mode, aborting without acknowledging");
                break;
            }

            self.acknowledge(&session_id, &message)
                .await
                .context("failed to delete message")?;

            if !message.message_type.eq_ignore_ascii_case(JOB_REQUEST_TYPE) {
                info!("ignoring incoming message of type {}", message.message_type);
                continue;
            }

            let request = match self.decode_job_request(&message) {
                Ok(request) => request,
                Err(e) => {
                    error!("dropping undecodable job request: {e:#}");
                    continue;
                }
            };

            if self.run_once {
                info!("first job received");
                first_job_received = true;
            }

            let dispatch = self.dispatch.clone();
            let run_once = self.run_once;
            let once_done_tx = once_done_tx.clone();
            jobs.push(tokio::spawn(async move {
                job::run_job(dispatch, request).await;
                if run_once {
                    let _ = once_done_tx.send(true);
                }
            }));
        }

        // SIGINT stops intake; jobs already running are allowed to finish.
        for handle in jobs {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn poll_once(
        &self,
        session_id: &str,
    ) -> gantry_client::Result<Option<BrokerMessage>> {
        with_auth_retry(
            &self.dispatch.token,
            &self.dispatch.authorizer,
            &self.dispatch.http,
            |bearer| {
                let client = self.dispatch.runner_client.clone();
                let pool_id = self.dispatch.settings.pool_id;
                let session_id = session_id.to_string();
                async move { client.poll_message(&bearer, pool_id, &session_id).await }
            },
        )
        .await
    }

    async fn acknowledge(
        &self,
        session_id: &str,
        message: &BrokerMessage,
    ) -> gantry_client::Result<()> {
        with_auth_retry(
            &self.dispatch.token,
            &self.dispatch.authorizer,
            &self.dispatch.http,
            |bearer| {
                let client = self.dispatch.runner_client.clone();
                let pool_id = self.dispatch.settings.pool_id;
                let session_id = session_id.to_string();
                let message_id = message.message_id;
                async move {
                    client
                        .delete_message(&bearer, pool_id, message_id, &session_id)
                        .await
                }
            },
        )
        .await
    }

    fn decode_job_request(&self, message: &BrokerMessage) -> Result<AgentJobRequest> {
        let payload = decrypt_envelope(&self.session.aes_key, &message.iv, &message.body)
            .context("failed to decrypt message body")?;
        serde_json::from_slice(&payload).context("failed to decode job request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_job_aborts_only_in_run_once() {
        assert!(aborts_run_once(true, true, "PipelineAgentJobRequest"));
        assert!(aborts_run_once(true, true, "pipelineagentjobrequest"));
        assert!(!aborts_run_once(true, false, "PipelineAgentJobRequest"));
        assert!(!aborts_run_once(false, true, "PipelineAgentJobRequest"));
        assert!(!aborts_run_once(true, true, "JobCancellation"));
    }
}
