//! Job request wire messages
//!
//! The message queue delivers encrypted envelopes; a decrypted
//! `PipelineAgentJobRequest` body decodes into [`AgentJobRequest`], the
//! full description of one job: its plan coordinates, resources, contexts,
//! variables, and step list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::PipelineContextData;
use crate::template::TemplateToken;
use crate::timeline::TaskResult;

/// Encrypted envelope from the message queue long-poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerMessage {
    pub message_id: i64,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub iv: String,
    #[serde(default)]
    pub body: String,
}

/// A job variable; secret values feed the masker and the executor secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableValue {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

impl VariableValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_secret: true,
        }
    }
}

/// Additional masking rule shipped with the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskHint {
    #[serde(rename = "type")]
    pub hint_type: String,
    pub value: String,
}

/// Authorization block of a job endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAuthorization {
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub scheme: String,
}

/// A service endpoint handed to the job, e.g. `SystemVssConnection`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEndpoint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub authorization: EndpointAuthorization,
}

/// Resources attached to a job request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResources {
    #[serde(default)]
    pub endpoints: Vec<JobEndpoint>,
}

/// Coordinates of the server-side orchestration plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReference {
    pub scope_identifier: String,
    pub plan_id: String,
    pub plan_type: String,
}

/// Reference to the job's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineReference {
    pub id: Uuid,
    #[serde(default)]
    pub change_id: i32,
}

/// What a step executes: an inline script, a container image, or a
/// repository action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStepReference {
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub repository_type: String,
    #[serde(default)]
    pub path: String,
}

/// One wire step of a job request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default)]
    pub reference: ActionStepReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name_token: Option<TemplateToken>,
    #[serde(default)]
    pub context_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<TemplateToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<TemplateToken>,
    #[serde(default)]
    pub condition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<TemplateToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_in_minutes: Option<TemplateToken>,
}

/// A decoded `PipelineAgentJobRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentJobRequest {
    #[serde(default)]
    pub message_type: String,
    pub plan: PlanReference,
    pub timeline: TimelineReference,
    pub job_id: Uuid,
    #[serde(default)]
    pub job_display_name: String,
    #[serde(default)]
    pub job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_container: Option<TemplateToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_service_containers: Option<TemplateToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_outputs: Option<TemplateToken>,
    pub request_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<JobResources>,
    #[serde(default)]
    pub context_data: HashMap<String, PipelineContextData>,
    #[serde(rename = "mask", default)]
    pub mask_hints: Vec<MaskHint>,
    #[serde(default)]
    pub environment_variables: Vec<TemplateToken>,
    #[serde(default)]
    pub defaults: Vec<TemplateToken>,
    #[serde(default)]
    pub variables: HashMap<String, VariableValue>,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
    #[serde(default)]
    pub file_table: Vec<String>,
}

/// Job completion event posted back to the plan hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub name: String,
    pub job_id: Uuid,
    pub request_id: i64,
    pub result: TaskResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, VariableValue>>,
}

impl JobEvent {
    /// The `JobCompleted` event for a finished job.
    pub fn completed(
        job_id: Uuid,
        request_id: i64,
        result: TaskResult,
        outputs: Option<HashMap<String, VariableValue>>,
    ) -> Self {
        Self {
            name: "JobCompleted".to_string(),
            job_id,
            request_id,
            result,
            outputs,
        }
    }
}

/// Body of the periodic job-lease renewal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewJobRequest {
    pub request_id: i64,
}
