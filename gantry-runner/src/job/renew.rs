//! Job lease renewal
//!
//! While a job runs, its request lease is renewed on a fixed cadence (the
//! first renewal fires immediately). Renewal talks to the runner's own
//! tenant with the shared runner token, so it participates in the 401
//! refresh like the pump does. The loop stops when the job's scope is
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gantry_client::auth::Authorizer;
use gantry_client::TenantClient;

use crate::token::{with_auth_retry, SharedToken};

pub struct LockRenewer {
    pub client: TenantClient,
    pub http: reqwest::Client,
    pub token: SharedToken,
    pub authorizer: Arc<Authorizer>,
    pub pool_id: u32,
    pub request_id: i64,
    pub orchestration_id: Option<String>,
    pub interval: Duration,
}

impl LockRenewer {
    /// Spawns the renewal loop; it runs until `cancel` flips to true.
    pub fn spawn(self, mut cancel: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        self.renew_once().await;
                    }
                }
            }
        })
    }

    async fn renew_once(&self) {
        let result = with_auth_retry(&self.token, &self.authorizer, &self.http, |bearer| {
            let client = self.client.clone();
            let orchestration_id = self.orchestration_id.clone();
            let pool_id = self.pool_id;
            let request_id = self.request_id;
            async move {
                client
                    .renew_job(&bearer, pool_id, request_id, orchestration_id.as_deref())
                    .await
            }
        })
        .await;
        match result {
            Ok(()) => debug!("renewed lease on request {}", self.request_id),
            Err(e) => warn!("failed to renew job lease: {e:#}"),
        }
    }
}
