//! Job-scoped control-plane access
//!
//! One [`JobPlane`] bundles the calls a running job makes against its plan:
//! timeline PATCHes, feed batches, whole-log uploads, and the completion
//! event. The job bearer token is fixed at construction; it is job-scoped
//! and outlives the job, so there is no refresh path here.
//!
//! The trait exists so the orchestrator and formatter can be exercised
//! against a recording fake.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use gantry_client::TenantClient;
use gantry_core::message::{JobEvent, PlanReference};
use gantry_core::timeline::{FeedLinesWrapper, TimelineRecordWrapper};

/// Plan-scoped operations of one job.
#[async_trait]
pub trait JobPlane: Send + Sync {
    /// Replaces the full ordered record list.
    async fn update_timeline(&self, records: &TimelineRecordWrapper) -> Result<()>;

    /// Uploads a whole log and returns its server id.
    async fn upload_log(&self, content: String) -> Result<i32>;

    /// Posts a batch of console lines to a record's feed.
    async fn post_feed_lines(&self, lines: &FeedLinesWrapper) -> Result<()>;

    /// Posts a job event to the plan hub.
    async fn post_job_event(&self, event: &JobEvent) -> Result<()>;
}

/// HTTP implementation bound to one tenant, token, and timeline.
pub struct HttpJobPlane {
    client: TenantClient,
    token: String,
    plan: PlanReference,
    timeline_id: Uuid,
}

#[async_trait]
impl JobPlane for HttpJobPlane {
    async fn update_timeline(&self, records: &TimelineRecordWrapper) -> Result<()> {
        self.client
            .update_timeline(&self.token, &self.plan, self.timeline_id, records)
            .await
            .context("failed to update timeline")
    }

    async fn upload_log(&self, content: String) -> Result<i32> {
        self.client
            .upload_log(&self.token, &self.plan, self.timeline_id, content)
            .await
            .context("failed to upload log")
    }

    async fn post_feed_lines(&self, lines: &FeedLinesWrapper) -> Result<()> {
        self.client
            .post_feed_lines(&self.token, &self.plan, self.timeline_id, lines)
            .await
            .context("failed to post feed lines")
    }

    async fn post_job_event(&self, event: &JobEvent) -> Result<()> {
        self.client
            .post_job_event(&self.token, &self.plan, event)
            .await
            .context("failed to post job event")
    }
}

/// Builds [`JobPlane`]s for a job's resolved tenant and token.
///
/// A job's `SystemVssConnection` may point at a different tenant than the
/// runner registered with; the provider re-resolves connection data when
/// it does.
#[async_trait]
pub trait PlaneProvider: Send + Sync {
    async fn job_plane(
        &self,
        tenant_url: &str,
        token: &str,
        plan: &PlanReference,
        timeline_id: Uuid,
    ) -> Result<Arc<dyn JobPlane>>;
}

/// Provider reusing the runner's cached tenant where possible.
pub struct HttpPlaneProvider {
    http: reqwest::Client,
    runner_client: TenantClient,
}

impl HttpPlaneProvider {
    pub fn new(http: reqwest::Client, runner_client: TenantClient) -> Self {
        Self {
            http,
            runner_client,
        }
    }
}

#[async_trait]
impl PlaneProvider for HttpPlaneProvider {
    async fn job_plane(
        &self,
        tenant_url: &str,
        token: &str,
        plan: &PlanReference,
        timeline_id: Uuid,
    ) -> Result<Arc<dyn JobPlane>> {
        let client = if tenant_url.trim_end_matches('/') == self.runner_client.tenant_url() {
            self.runner_client.clone()
        } else {
            TenantClient::connect(self.http.clone(), tenant_url)
                .await
                .with_context(|| format!("failed to connect to job tenant {tenant_url}"))?
        };
        Ok(Arc::new(HttpJobPlane {
            client,
            token: token.to_string(),
            plan: plan.clone(),
            timeline_id,
        }))
    }
}
