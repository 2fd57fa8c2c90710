//! Job lease and completion endpoints

use gantry_core::message::{JobEvent, PlanReference, RenewJobRequest};

use crate::error::Result;
use crate::{service_ids, TenantClient, API_VERSION, RENEW_API_VERSION};

/// The placeholder lock token the renewal endpoint expects.
const EMPTY_LOCK_TOKEN: &str = "00000000-0000-0000-0000-000000000000";

impl TenantClient {
    /// Renews the lease on a running job request.
    ///
    /// The orchestration id, when known, is echoed back so the server can
    /// correlate the renewal with its plan execution.
    pub async fn renew_job(
        &self,
        token: &str,
        pool_id: u32,
        request_id: i64,
        orchestration_id: Option<&str>,
    ) -> Result<()> {
        let url = self.resource_url(
            service_ids::JOB_REQUESTS,
            &[
                ("poolId", &pool_id.to_string()),
                ("requestId", &request_id.to_string()),
            ],
            &[("lockToken", EMPTY_LOCK_TOKEN)],
        )?;
        let mut builder = self
            .service_request(self.http.patch(url), token, RENEW_API_VERSION)
            .json(&RenewJobRequest { request_id });
        if let Some(orchestration_id) = orchestration_id {
            builder = builder.header("X-VSS-OrchestrationId", orchestration_id);
        }
        let response = builder.send().await?;
        self.handle_empty_response(response).await
    }

    /// POSTs a job event (e.g. `JobCompleted`) to the plan hub.
    pub async fn post_job_event(
        &self,
        token: &str,
        plan: &PlanReference,
        event: &JobEvent,
    ) -> Result<()> {
        let url = self.resource_url(
            service_ids::JOB_EVENTS,
            &[
                ("scopeIdentifier", plan.scope_identifier.as_str()),
                ("planId", plan.plan_id.as_str()),
                ("hubName", plan.plan_type.as_str()),
            ],
            &[],
        )?;
        let response = self
            .service_request(self.http.post(url), token, API_VERSION)
            .json(event)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }
}
