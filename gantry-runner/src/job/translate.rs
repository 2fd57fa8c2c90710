//! Job request translation
//!
//! Maps a decoded wire job onto the engine's run representation: secrets,
//! matrix, env, defaults, steps, containers, `needs` stubs, and declared
//! job outputs. Translation is strict where the engine cannot cope with an
//! expression or a non-string value; any such shape fails job
//! initialization with a message that ends up as the setup log.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use gantry_core::message::{ActionStep, AgentJobRequest};
use gantry_core::template::RawValue;
use gantry_engine::model::{ContainerSpec, Defaults, Step, Workflow, WorkflowJob};
use gantry_engine::{RunConfig, RunContext};

/// The variable whose value is surfaced to workflows as `GITHUB_TOKEN`.
const GITHUB_TOKEN_VARIABLE: &str = "system.github.token";

/// Builds the engine run context from a wire job request.
///
/// `job_tenant`, `job_token`, and `cache_url` come from the resolved
/// `SystemVssConnection` endpoint and are injected as the `ACTIONS_*`
/// runtime environment.
pub fn translate(
    request: &AgentJobRequest,
    job_tenant: &str,
    job_token: &str,
    cache_url: Option<&str>,
) -> Result<RunContext> {
    let github = request
        .context_data
        .get("github")
        .context("missing github context in context data")?
        .to_json();
    let serde_json::Value::Object(github) = github else {
        bail!("github context is not a map");
    };
    let event_name = github
        .get("event_name")
        .and_then(|v| v.as_str())
        .context("github.event_name is not a string")?
        .to_string();
    let workflow_name = github
        .get("workflow")
        .and_then(|v| v.as_str())
        .context("github.workflow is not a string")?
        .to_string();
    let github_instance = github
        .get("server_url")
        .and_then(|v| v.as_str())
        .map(|url| url.strip_prefix("https://").unwrap_or(url).to_string())
        .unwrap_or_default();
    let event_json = github
        .get("event")
        .map(|event| event.to_string())
        .unwrap_or_else(|| "null".to_string());

    let secrets = collect_secrets(request);
    let matrix = collect_matrix(request)?;
    let env = collect_env(request, job_tenant, job_token, cache_url)?;
    let defaults = merge_defaults(request)?;
    let steps = translate_steps(request)?;
    let container = request
        .job_container
        .as_ref()
        .map(|token| token.to_yaml())
        .unwrap_or(serde_yaml::Value::Null);
    let services = translate_services(request)?;

    let job_key = request.job_id.to_string();
    let mut jobs = HashMap::new();
    let mut needs = Vec::new();
    if let Some(needs_ctx) = request.context_data.get("needs") {
        if let serde_json::Value::Object(needs_map) = needs_ctx.to_json() {
            for (name, upstream) in needs_map {
                jobs.insert(name.clone(), WorkflowJob::outputs_stub(upstream_outputs(&upstream)));
                needs.push(name);
            }
        }
    }

    jobs.insert(
        job_key.clone(),
        WorkflowJob {
            name: request.job_display_name.clone(),
            runs_on: "self-hosted".to_string(),
            needs,
            steps,
            container,
            services,
            outputs: declared_outputs(request),
        },
    );

    Ok(RunContext {
        config: RunConfig {
            workdir: ".".to_string(),
            secrets,
            event_name,
            github_instance,
        },
        env,
        matrix,
        event_json,
        github_context: serde_json::Value::Object(github).to_string(),
        workflow: Workflow {
            name: workflow_name,
            defaults,
            jobs,
        },
        job_id: job_key,
    })
}

/// Secret variables, with the reserved token variable renamed.
fn collect_secrets(request: &AgentJobRequest) -> HashMap<String, String> {
    let mut secrets = HashMap::new();
    for (name, variable) in &request.variables {
        if variable.is_secret && name != GITHUB_TOKEN_VARIABLE {
            secrets.insert(name.clone(), variable.value.clone());
        }
    }
    if let Some(token) = request.variables.get(GITHUB_TOKEN_VARIABLE) {
        secrets.insert("GITHUB_TOKEN".to_string(), token.value.clone());
    }
    secrets
}

fn collect_matrix(request: &AgentJobRequest) -> Result<HashMap<String, serde_json::Value>> {
    let Some(matrix) = request.context_data.get("matrix") else {
        return Ok(HashMap::new());
    };
    match matrix.to_json() {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        serde_json::Value::Null => Ok(HashMap::new()),
        _ => bail!("matrix: not a map"),
    }
}

fn collect_env(
    request: &AgentJobRequest,
    job_tenant: &str,
    job_token: &str,
    cache_url: Option<&str>,
) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for token in &request.environment_variables {
        let RawValue::Mapping(entries) = token.to_raw() else {
            bail!("env: not a map");
        };
        for (key, value) in entries {
            let RawValue::String(key) = key else {
                bail!("env key is not a string");
            };
            let RawValue::String(value) = value else {
                bail!("env value is not a string");
            };
            env.insert(key, value);
        }
    }
    env.insert("ACTIONS_RUNTIME_URL".to_string(), job_tenant.to_string());
    env.insert("ACTIONS_RUNTIME_TOKEN".to_string(), job_token.to_string());
    if let Some(cache_url) = cache_url {
        env.insert("ACTIONS_CACHE_URL".to_string(), cache_url.to_string());
    }
    Ok(env)
}

/// Folds the wire `defaults[]` entries into one [`Defaults`], later entries
/// overriding earlier ones field by field.
fn merge_defaults(request: &AgentJobRequest) -> Result<Defaults> {
    let mut defaults = Defaults::default();
    for token in &request.defaults {
        let json = token
            .to_raw()
            .into_json()
            .map_err(|_| anyhow::anyhow!("failed to evaluate defaults"))?;
        let parsed: Defaults =
            serde_json::from_value(json).map_err(|_| anyhow::anyhow!("failed to evaluate defaults"))?;
        if parsed.run.shell.is_some() {
            defaults.run.shell = parsed.run.shell;
        }
        if parsed.run.working_directory.is_some() {
            defaults.run.working_directory = parsed.run.working_directory;
        }
    }
    Ok(defaults)
}

fn translate_steps(request: &AgentJobRequest) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    for step in &request.steps {
        if let Some(translated) = translate_step(step)? {
            steps.push(translated);
        }
    }
    Ok(steps)
}

fn translate_step(step: &ActionStep) -> Result<Option<Step>> {
    let inputs = match &step.inputs {
        Some(token) => match token.to_raw() {
            RawValue::Mapping(entries) => entries,
            _ => bail!("step inputs: not a map"),
        },
        None => Vec::new(),
    };

    let mut env = HashMap::new();
    if let Some(token) = &step.environment {
        let RawValue::Mapping(entries) = token.to_raw() else {
            bail!("step environment: not a map");
        };
        for (key, value) in entries {
            let RawValue::String(key) = key else {
                bail!("env key is not a string");
            };
            let RawValue::String(value) = value else {
                bail!("env value is not a string");
            };
            env.insert(key, value);
        }
    }

    let working_directory = match mapping_get(&inputs, "workingDirectory") {
        Some(RawValue::String(dir)) => dir.clone(),
        Some(_) => bail!("workingDirectory is not a string"),
        None => String::new(),
    };

    let continue_on_error = match &step.continue_on_error {
        Some(token) => match token.to_raw() {
            RawValue::Bool(flag) => flag,
            _ => bail!("continue-on-error must be a boolean literal"),
        },
        None => false,
    };

    let timeout_minutes = match &step.timeout_in_minutes {
        Some(token) => match token.to_raw() {
            RawValue::Number(minutes) => minutes as i64,
            _ => bail!("timeout-minutes must be a numeric literal"),
        },
        None => 0,
    };

    let name = match &step.display_name_token {
        Some(token) => match token.to_raw() {
            RawValue::String(name) => name,
            _ => bail!("display name is not a string"),
        },
        None => String::new(),
    };

    let id = if step.context_name.is_empty() {
        format!("___{}", Uuid::new_v4())
    } else {
        step.context_name.clone()
    };

    let base = Step {
        id,
        if_condition: step.condition.clone(),
        name,
        working_directory,
        env,
        continue_on_error,
        timeout_minutes,
        ..Default::default()
    };

    match step.reference.step_type.to_lowercase().as_str() {
        "script" => {
            let shell = match mapping_get(&inputs, "shell") {
                Some(RawValue::String(shell)) => shell.clone(),
                Some(_) => bail!("shell is not a string"),
                None => String::new(),
            };
            let Some(RawValue::String(script)) = mapping_get(&inputs, "script") else {
                bail!("missing script");
            };
            Ok(Some(Step {
                run: Some(script.clone()),
                shell,
                ..base
            }))
        }
        "containerregistry" | "repository" => {
            let uses = if step.reference.step_type.eq_ignore_ascii_case("containerregistry") {
                format!("docker://{}", step.reference.image)
            } else if step.reference.repository_type.eq_ignore_ascii_case("self") {
                step.reference.path.clone()
            } else {
                let mut uses = step.reference.name.clone();
                if !step.reference.path.is_empty() {
                    uses = format!("{uses}/{}", step.reference.path);
                }
                format!("{uses}@{}", step.reference.git_ref)
            };
            let mut with = HashMap::new();
            for (key, value) in &inputs {
                let RawValue::String(key) = key else {
                    bail!("with input key is not a string");
                };
                let RawValue::String(value) = value else {
                    bail!("with input value is not a string");
                };
                with.insert(key.clone(), value.clone());
            }
            Ok(Some(Step {
                uses: Some(uses),
                with,
                ..base
            }))
        }
        _ => Ok(None),
    }
}

fn translate_services(request: &AgentJobRequest) -> Result<HashMap<String, ContainerSpec>> {
    let mut services = HashMap::new();
    let Some(token) = &request.job_service_containers else {
        return Ok(services);
    };
    let RawValue::Mapping(entries) = token.to_raw() else {
        bail!("job service containers: not a map");
    };
    for (name, container) in entries {
        let RawValue::String(name) = name else {
            bail!("service container name is not a string");
        };
        let json = container
            .into_json()
            .map_err(|_| anyhow::anyhow!("failed to encode service container"))?;
        let spec: ContainerSpec = serde_json::from_value(json)
            .map_err(|_| anyhow::anyhow!("failed to decode service container"))?;
        services.insert(name, spec);
    }
    Ok(services)
}

/// Outputs of one upstream job out of the `needs` context.
fn upstream_outputs(upstream: &serde_json::Value) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    if let Some(map) = upstream.get("outputs").and_then(|o| o.as_object()) {
        for (key, value) in map {
            if let Some(value) = value.as_str() {
                outputs.insert(key.clone(), value.to_string());
            }
        }
    }
    outputs
}

/// The job's declared outputs, pre-populated with their literal values.
fn declared_outputs(request: &AgentJobRequest) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    if let Some(token) = &request.job_outputs {
        if let RawValue::Mapping(entries) = token.to_raw() {
            for (key, value) in entries {
                if let (RawValue::String(key), RawValue::String(value)) = (key, value) {
                    outputs.insert(key, value);
                }
            }
        }
    }
    outputs
}

fn mapping_get<'a>(entries: &'a [(RawValue, RawValue)], key: &str) -> Option<&'a RawValue> {
    entries
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}
