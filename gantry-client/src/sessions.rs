//! Session endpoints
//!
//! A session is the runner's claim on the message queue. Creating one
//! returns the RSA-wrapped AES key later used to decrypt message bodies;
//! the caller unwraps it with the agent private key.

use uuid::Uuid;

use gantry_core::agent::{TaskAgent, TaskAgentSession};

use crate::error::Result;
use crate::{service_ids, TenantClient, API_VERSION};

impl TenantClient {
    /// Creates a message-queue session for this agent.
    pub async fn create_session(
        &self,
        token: &str,
        pool_id: u32,
        agent: TaskAgent,
    ) -> Result<TaskAgentSession> {
        let url = self.resource_url(
            service_ids::SESSIONS,
            &[("poolId", &pool_id.to_string())],
            &[],
        )?;
        let body = TaskAgentSession::request(agent);
        let response = self
            .service_request(self.http.post(url), token, API_VERSION)
            .json(&body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Deletes the session on shutdown. Failure here is reported to the
    /// caller but must not block process exit.
    pub async fn delete_session(
        &self,
        token: &str,
        pool_id: u32,
        session_id: Uuid,
    ) -> Result<()> {
        let url = self.resource_url(
            service_ids::SESSIONS,
            &[
                ("poolId", &pool_id.to_string()),
                ("sessionId", &session_id.to_string()),
            ],
            &[],
        )?;
        let response = self
            .service_request(self.http.delete(url), token, API_VERSION)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }
}
