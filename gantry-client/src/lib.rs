//! Gantry control-plane client
//!
//! A typed HTTP client for the hosted pipeline control plane. One
//! [`TenantClient`] wraps a tenant base URL plus its cached connection-data
//! document and exposes the endpoint groups the runner needs:
//! - Registration and OAuth token exchange
//! - Sessions and the encrypted message queue
//! - Timelines, log feeds, and whole-log uploads
//! - Job lease renewal and completion events
//!
//! Callers pass the bearer token per call; 401 handling (re-authorize and
//! retry once) belongs to the caller, which owns the [`auth::Authorizer`].

pub mod auth;
pub mod error;
pub mod location;

mod agents;
mod jobs;
mod messages;
mod sessions;
mod timeline;

pub use error::{ClientError, Result};
pub use location::{get_connection_data, service_ids, ConnectionData, ServiceDefinition};

use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Default api-version attached to service calls.
const API_VERSION: &str = "6.0-preview";
/// Agent registration uses a newer preview revision.
const AGENTS_API_VERSION: &str = "6.0-preview.2";
/// Lease renewal is served by an older area.
const RENEW_API_VERSION: &str = "5.1-preview";

/// Client for one tenant of the control plane.
#[derive(Debug, Clone)]
pub struct TenantClient {
    http: reqwest::Client,
    tenant_url: String,
    connection: ConnectionData,
    e2e_id: String,
    session_marker: String,
}

impl TenantClient {
    /// Connects to a tenant: fetches and caches its connection-data
    /// document. Fails if the tenant is unreachable.
    pub async fn connect(http: reqwest::Client, tenant_url: impl Into<String>) -> Result<Self> {
        let tenant_url = tenant_url.into();
        let tenant_url = tenant_url.trim_end_matches('/').to_string();
        let connection = get_connection_data(&http, &tenant_url).await?;
        Ok(Self {
            http,
            tenant_url,
            connection,
            e2e_id: Uuid::new_v4().to_string(),
            session_marker: Uuid::new_v4().to_string(),
        })
    }

    /// Builds a client around an already-fetched connection-data document,
    /// e.g. one cached from an earlier [`connect`](Self::connect).
    pub fn with_connection(
        http: reqwest::Client,
        tenant_url: impl Into<String>,
        connection: ConnectionData,
    ) -> Self {
        let tenant_url = tenant_url.into();
        Self {
            tenant_url: tenant_url.trim_end_matches('/').to_string(),
            http,
            connection,
            e2e_id: Uuid::new_v4().to_string(),
            session_marker: Uuid::new_v4().to_string(),
        }
    }

    /// The tenant base URL this client talks to.
    pub fn tenant_url(&self) -> &str {
        &self.tenant_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Builds a resource URL from a well-known service GUID.
    ///
    /// The `area` and `resource` template tokens come from the service
    /// definition itself; callers supply the rest.
    fn resource_url(
        &self,
        service_id: &str,
        params: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<String> {
        let def = self.connection.service(service_id)?;
        let mut all: Vec<(&str, &str)> = vec![
            ("area", def.service_type.as_str()),
            ("resource", def.display_name.as_str()),
        ];
        all.extend_from_slice(params);
        location::build_url(&self.tenant_url, &def.relative_path, &all, query)
    }

    /// Decorates a request with the bearer token and the protocol headers
    /// every service call carries.
    fn service_request(
        &self,
        builder: reqwest::RequestBuilder,
        token: &str,
        api_version: &str,
    ) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("bearer {token}"))
            .header(
                "Content-Type",
                format!("application/json; charset=utf-8; api-version={api_version}"),
            )
            .header("Accept", format!("application/json; api-version={api_version}"))
            .header("X-VSS-E2EID", &self.e2e_id)
            .header("X-TFS-FedAuthRedirect", "Suppress")
            .header("X-TFS-Session", &self.session_marker)
    }

    /// Checks the status code and deserializes the JSON body.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::api(status.as_u16(), body));
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("response body: {e}")))
    }

    /// Checks the status code of a call that returns no useful body.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::api(status.as_u16(), body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use location::{LocationServiceData, ServiceDefinition};

    fn test_client() -> TenantClient {
        TenantClient {
            http: reqwest::Client::new(),
            tenant_url: "https://pipelines.example.test/tenant".to_string(),
            connection: ConnectionData {
                location_service_data: LocationServiceData {
                    service_definitions: vec![ServiceDefinition {
                        service_type: "distributedtask".to_string(),
                        identifier: service_ids::MESSAGE_QUEUE.to_string(),
                        display_name: "messages".to_string(),
                        relative_path: "_apis/{area}/pools/{poolId}/{resource}/{messageId}"
                            .to_string(),
                    }],
                },
            },
            e2e_id: "e2e".to_string(),
            session_marker: "marker".to_string(),
        }
    }

    #[test]
    fn test_resource_url_fills_area_and_resource() {
        let client = test_client();
        let url = client
            .resource_url(
                service_ids::MESSAGE_QUEUE,
                &[("poolId", "1")],
                &[("sessionId", "s-1")],
            )
            .unwrap();
        assert_eq!(
            url,
            "https://pipelines.example.test/tenant/_apis/distributedtask/pools/1/messages?sessionId=s-1"
        );
    }

    #[test]
    fn test_resource_url_fails_for_missing_service() {
        let client = test_client();
        let err = client
            .resource_url(service_ids::TIMELINE, &[], &[])
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingService(_)));
    }
}
