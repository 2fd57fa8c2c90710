//! Service location
//!
//! A tenant describes its REST surface in a connection-data document: one
//! service definition per area, addressed by a well-known GUID, carrying a
//! relative path template like `{area}/{resource}/{poolId}/...`. URLs are
//! built by substituting the template and dropping any optional segments
//! that stayed unfilled.

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Well-known service identifiers.
pub mod service_ids {
    pub const SESSIONS: &str = "134e239e-2df3-4794-a6f6-24f1f19ec8dc";
    pub const MESSAGE_QUEUE: &str = "c3a054f6-7a8a-49c0-944e-3a8e5d7adfd7";
    pub const JOB_REQUESTS: &str = "fc825784-c92a-4299-9221-998a02d1b54f";
    pub const RECORD_FEED: &str = "858983e4-19bd-4c5e-864c-507b59b58b12";
    pub const TASK_LOGS: &str = "46f5667d-263a-4684-91b1-dff7fdcf64e2";
    pub const TIMELINE: &str = "8893bc5b-35b2-4be7-83cb-99e683551db4";
    pub const JOB_EVENTS: &str = "557624af-b29e-4c20-8ab0-0399d2204f3f";
    pub const AGENT_POOLS: &str = "a8c47e17-4d56-4a56-92bb-de7ea7dc65be";
    pub const AGENTS: &str = "e298ef32-5878-4cab-993c-043836571f42";
}

/// One REST area offered by the tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub relative_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationServiceData {
    #[serde(default)]
    pub service_definitions: Vec<ServiceDefinition>,
}

/// The cached connection-data document for one tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    #[serde(default)]
    pub location_service_data: LocationServiceData,
}

impl ConnectionData {
    /// Looks up a service definition by its well-known GUID.
    ///
    /// A missing service means this tenant cannot host the runner at all,
    /// so the lookup error is fatal to the caller.
    pub fn service(&self, identifier: &str) -> Result<&ServiceDefinition> {
        self.location_service_data
            .service_definitions
            .iter()
            .find(|def| def.identifier.eq_ignore_ascii_case(identifier))
            .ok_or_else(|| ClientError::MissingService(identifier.to_string()))
    }
}

/// Fetches and caches the tenant's connection-data document.
pub async fn get_connection_data(
    http: &reqwest::Client,
    tenant_url: &str,
) -> Result<ConnectionData> {
    let url = build_url(
        tenant_url,
        "_apis/connectionData",
        &[],
        &[
            ("connectOptions", "1"),
            ("lastChangeId", "-1"),
            ("lastChangeId64", "-1"),
        ],
    )?;
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::api(status.as_u16(), body));
    }
    response
        .json::<ConnectionData>()
        .await
        .map_err(|e| ClientError::Decode(format!("connection data: {e}")))
}

/// Substitutes `{name}` tokens of a relative-path template, strips unfilled
/// optional `/*{...}` tails, joins onto the tenant URL, and appends the
/// query string.
pub fn build_url(
    tenant_url: &str,
    relative_path: &str,
    params: &[(&str, &str)],
    query: &[(&str, &str)],
) -> Result<String> {
    let mut relative = relative_path.to_string();
    for (name, value) in params {
        relative = relative.replace(&format!("{{{name}}}"), value);
    }
    let unfilled = Regex::new(r"/*\{[^}]+\}").expect("static pattern");
    let relative = unfilled.replace_all(&relative, "");

    let mut url =
        Url::parse(tenant_url).map_err(|e| ClientError::Url(format!("{tenant_url}: {e}")))?;
    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        relative.trim_matches('/')
    );
    url.set_path(&joined);
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in query {
            pairs.append_pair(name, value);
        }
    }
    Ok(url.to_string())
}
