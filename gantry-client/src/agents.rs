//! Agent pool endpoints, used during registration

use serde::Deserialize;

use gantry_core::agent::{TaskAgent, TaskAgentPool};

use crate::error::Result;
use crate::{service_ids, TenantClient, AGENTS_API_VERSION, API_VERSION};

#[derive(Debug, Deserialize)]
struct ListWrapper<T> {
    #[serde(default)]
    #[allow(dead_code)]
    count: i64,
    value: Vec<T>,
}

impl TenantClient {
    /// Lists the tenant's agent pools.
    pub async fn list_pools(&self, token: &str) -> Result<Vec<TaskAgentPool>> {
        let url = self.resource_url(service_ids::AGENT_POOLS, &[], &[])?;
        let response = self
            .service_request(self.http.get(url), token, API_VERSION)
            .send()
            .await?;
        let pools: ListWrapper<TaskAgentPool> = self.handle_response(response).await?;
        Ok(pools.value)
    }

    /// Creates the agent record in a pool; the response carries the
    /// server-assigned id and OAuth authorization material.
    pub async fn create_agent(
        &self,
        token: &str,
        pool_id: u32,
        agent: &TaskAgent,
    ) -> Result<TaskAgent> {
        let url = self.resource_url(
            service_ids::AGENTS,
            &[("poolId", &pool_id.to_string())],
            &[],
        )?;
        let response = self
            .service_request(self.http.post(url), token, AGENTS_API_VERSION)
            .json(agent)
            .send()
            .await?;
        self.handle_response(response).await
    }
}
