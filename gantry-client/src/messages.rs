//! Message queue endpoints
//!
//! The queue is long-polled: the server holds the GET open until a message
//! arrives or its own poll window lapses. A 2xx status other than 200
//! means "no message yet"; the caller polls again. Received messages are
//! acknowledged by deletion.

use gantry_core::message::BrokerMessage;

use crate::error::Result;
use crate::{service_ids, TenantClient, API_VERSION};

impl TenantClient {
    /// Long-polls the message queue once.
    ///
    /// Returns `None` when the server answered without a message (any 2xx
    /// other than 200).
    pub async fn poll_message(
        &self,
        token: &str,
        pool_id: u32,
        session_id: &str,
    ) -> Result<Option<BrokerMessage>> {
        let url = self.resource_url(
            service_ids::MESSAGE_QUEUE,
            &[("poolId", &pool_id.to_string())],
            &[("sessionId", session_id)],
        )?;
        let response = self
            .service_request(self.http.get(url), token, API_VERSION)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 200 {
            let message = self
                .handle_response::<BrokerMessage>(response)
                .await?;
            return Ok(Some(message));
        }
        if status.is_success() {
            return Ok(None);
        }
        let body = response.text().await.unwrap_or_default();
        Err(crate::ClientError::api(status.as_u16(), body))
    }

    /// Acknowledges a message by deleting it from the queue.
    pub async fn delete_message(
        &self,
        token: &str,
        pool_id: u32,
        message_id: i64,
        session_id: &str,
    ) -> Result<()> {
        let url = self.resource_url(
            service_ids::MESSAGE_QUEUE,
            &[
                ("poolId", &pool_id.to_string()),
                ("messageId", &message_id.to_string()),
            ],
            &[("sessionId", session_id)],
        )?;
        let response = self
            .service_request(self.http.delete(url), token, API_VERSION)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }
}
