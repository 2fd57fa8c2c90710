//! Timeline, feed, and log endpoints
//!
//! Timeline PATCHes replace the whole ordered record list. Console lines
//! stream to the per-record feed in batches; finished steps additionally
//! upload their full text as a task log in two phases (create, then fill).

use uuid::Uuid;

use gantry_core::message::PlanReference;
use gantry_core::timeline::{timestamp, FeedLinesWrapper, TaskLog, TimelineRecordWrapper};

use crate::error::Result;
use crate::{service_ids, TenantClient, API_VERSION};

impl TenantClient {
    /// PATCHes the full record list of a timeline.
    pub async fn update_timeline(
        &self,
        token: &str,
        plan: &PlanReference,
        timeline_id: Uuid,
        records: &TimelineRecordWrapper,
    ) -> Result<()> {
        let url = self.resource_url(
            service_ids::TIMELINE,
            &[
                ("scopeIdentifier", plan.scope_identifier.as_str()),
                ("planId", plan.plan_id.as_str()),
                ("hubName", plan.plan_type.as_str()),
                ("timelineId", &timeline_id.to_string()),
            ],
            &[],
        )?;
        let response = self
            .service_request(self.http.patch(url), token, API_VERSION)
            .json(records)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    /// POSTs a batch of console lines to one record's feed.
    pub async fn post_feed_lines(
        &self,
        token: &str,
        plan: &PlanReference,
        timeline_id: Uuid,
        lines: &FeedLinesWrapper,
    ) -> Result<()> {
        let url = self.resource_url(
            service_ids::RECORD_FEED,
            &[
                ("scopeIdentifier", plan.scope_identifier.as_str()),
                ("planId", plan.plan_id.as_str()),
                ("hubName", plan.plan_type.as_str()),
                ("timelineId", &timeline_id.to_string()),
                ("recordId", &lines.step_id.to_string()),
            ],
            &[],
        )?;
        let response = self
            .service_request(self.http.post(url), token, API_VERSION)
            .json(lines)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    /// Uploads a whole per-step log and returns the server-assigned log id.
    ///
    /// Two phases: create the log record at a fresh `logs/<uuid>` path,
    /// then POST the raw text to it.
    pub async fn upload_log(
        &self,
        token: &str,
        plan: &PlanReference,
        timeline_id: Uuid,
        content: String,
    ) -> Result<i32> {
        let plan_params = [
            ("scopeIdentifier", plan.scope_identifier.to_string()),
            ("planId", plan.plan_id.to_string()),
            ("hubName", plan.plan_type.to_string()),
            ("timelineId", timeline_id.to_string()),
        ];
        let borrowed: Vec<(&str, &str)> = plan_params
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();

        let now = timestamp();
        let log = TaskLog {
            id: 0,
            path: Some(format!("logs/{}", Uuid::new_v4())),
            created_on: now.clone(),
            last_changed_on: now,
            line_count: None,
        };
        let url = self.resource_url(service_ids::TASK_LOGS, &borrowed, &[])?;
        let response = self
            .service_request(self.http.post(url), token, API_VERSION)
            .json(&log)
            .send()
            .await?;
        let created: TaskLog = self.handle_response(response).await?;

        let log_id = created.id.to_string();
        let mut with_id = borrowed;
        with_id.push(("logId", log_id.as_str()));
        let url = self.resource_url(service_ids::TASK_LOGS, &with_id, &[])?;
        let response = self
            .service_request(self.http.post(url), token, API_VERSION)
            .body(content)
            .send()
            .await?;
        self.handle_empty_response(response).await?;

        Ok(created.id)
    }
}
