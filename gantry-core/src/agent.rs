//! Agent identity and session types
//!
//! Records exchanged while enrolling a runner and opening its long-lived
//! message session: the agent record the control plane assigns at
//! registration, the OAuth token response, and the encrypted session key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability label attached to an agent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLabel {
    #[serde(default)]
    pub id: i32,
    pub name: String,
    #[serde(rename = "type")]
    pub label_type: String,
}

impl AgentLabel {
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            label_type: "system".to_string(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            label_type: "user".to_string(),
        }
    }
}

/// RSA public key as the service stores it: base64 of the big-endian
/// exponent (leading zeros stripped) and the big-endian modulus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPublicKey {
    pub exponent: String,
    pub modulus: String,
}

/// OAuth material the service assigns to a registered agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAuthorization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub public_key: AgentPublicKey,
}

/// The agent record as created by registration and echoed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgent {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub version: String,
    pub os_description: String,
    pub provisioning_state: String,
    pub created_on: String,
    pub max_parallelism: i32,
    pub labels: Vec<AgentLabel>,
    #[serde(default)]
    pub authorization: AgentAuthorization,
}

/// A server-side grouping of agents; self-hosted runners live in pool 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgentPool {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_hosted: bool,
    #[serde(default)]
    pub size: i32,
}

/// Wrapped AES session key returned on session create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEncryptionKey {
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub value: String,
}

/// A message-queue session for one runner process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgentSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub owner_name: String,
    pub agent: TaskAgent,
    #[serde(default)]
    pub encryption_key: SessionEncryptionKey,
    pub use_fips_encryption: bool,
}

impl TaskAgentSession {
    /// Builds the create-session request body for this agent.
    pub fn request(agent: TaskAgent) -> Self {
        Self {
            session_id: None,
            owner_name: "RUNNER".to_string(),
            agent,
            encryption_key: SessionEncryptionKey::default(),
            use_fips_encryption: true,
        }
    }
}

/// Bearer token from the client-credentials exchange. Lives about an hour;
/// replaced wholesale on 401.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

/// Body of the initial registration call against the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRegistration {
    pub url: String,
    pub runner_event: String,
}

/// Tenant handoff returned by the registration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAuthResult {
    #[serde(rename = "url")]
    pub tenant_url: String,
    pub token_schema: String,
    pub token: String,
}
