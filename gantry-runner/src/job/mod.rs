//! Per-job machinery
//!
//! One accepted `PipelineAgentJobRequest` is owned by [`run_job`]: it
//! builds the timeline, resolves the job-scoped connection, starts the
//! lease renewer and the log streamer, translates the wire job for the
//! engine, and reports completion. Failures before the engine takes over
//! are reported through the synthetic setup step; a panicking engine is
//! caught and reported the same way.

mod logs;
mod plane;
mod renew;
mod timeline;
mod translate;

pub use plane::{HttpPlaneProvider, JobPlane, PlaneProvider};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use gantry_client::auth::{unverified_claim, Authorizer};
use gantry_client::TenantClient;
use gantry_core::message::{AgentJobRequest, JobEvent, VariableValue};
use gantry_core::timeline::{TaskLogReference, TaskResult, TimelineRecordWrapper};
use gantry_engine::{ExecutionState, Executor};

use crate::config::RunnerSettings;
use crate::job::logs::{spawn_streamer, JobLogFormatter, Masker};
use crate::job::renew::LockRenewer;
use crate::job::timeline::{JOB_RECORD, SETUP_RECORD};
use crate::token::SharedToken;

/// Everything a job borrows from the runner process.
#[derive(Clone)]
pub struct JobDispatch {
    pub settings: RunnerSettings,
    pub runner_client: TenantClient,
    pub http: reqwest::Client,
    pub token: SharedToken,
    pub authorizer: Arc<Authorizer>,
    pub executor: Arc<dyn Executor>,
    pub planes: Arc<dyn PlaneProvider>,
}

/// Runs one job to completion. Never propagates errors to the pump; every
/// failure path reports through the timeline and the completion event.
pub async fn run_job(dispatch: JobDispatch, request: AgentJobRequest) {
    info!(
        "starting job {} (request {})",
        request.job_display_name, request.request_id
    );

    let timeline_id = request.timeline.id;
    let mut job_token = dispatch.token.bearer();
    let mut job_tenant = dispatch.runner_client.tenant_url().to_string();

    let plane = match dispatch
        .planes
        .job_plane(&job_tenant, &job_token, &request.plan, timeline_id)
        .await
    {
        Ok(plane) => plane,
        Err(e) => {
            error!("cannot reach the job timeline, abandoning job: {e:#}");
            return;
        }
    };

    let wrap = Arc::new(Mutex::new(timeline::initial_records(&request)));
    patch_timeline(&plane, &wrap).await;

    // Resolve the job-scoped connection before anything else can fail.
    let Some(resources) = &request.resources else {
        fail_init(&plane, &wrap, &request, "Missing job resources").await;
        return;
    };
    if resources.endpoints.is_empty() {
        fail_init(&plane, &wrap, &request, "Missing job resources endpoints").await;
        return;
    }

    let mut orchestration_id = None;
    let mut cache_url = None;
    for endpoint in &resources.endpoints {
        if !endpoint.name.eq_ignore_ascii_case("SystemVssConnection") {
            continue;
        }
        let Some(token) = endpoint.authorization.parameters.get("AccessToken") else {
            continue;
        };
        if token.is_empty() {
            continue;
        }
        job_token = token.clone();
        if !endpoint.url.is_empty() && endpoint.url != job_tenant {
            job_tenant = endpoint.url.clone();
        }
        orchestration_id = unverified_claim(&job_token, "orchid");
        cache_url = endpoint.data.get("CacheServerUrl").cloned();
    }

    // Rebind the plane to the job-scoped token (and tenant, if it moved).
    let plane = match dispatch
        .planes
        .job_plane(&job_tenant, &job_token, &request.plan, timeline_id)
        .await
    {
        Ok(plane) => plane,
        Err(e) => {
            fail_init(
                &plane,
                &wrap,
                &request,
                &format!("Failed to reach job tenant {job_tenant}: {e:#}"),
            )
            .await;
            return;
        }
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let renewer = LockRenewer {
        client: dispatch.runner_client.clone(),
        http: dispatch.http.clone(),
        token: dispatch.token.clone(),
        authorizer: dispatch.authorizer.clone(),
        pool_id: dispatch.settings.pool_id,
        request_id: request.request_id,
        orchestration_id,
        interval: dispatch.settings.renew_interval,
    }
    .spawn(cancel_rx);

    let finish = |result: TaskResult, outputs: Option<HashMap<String, VariableValue>>| {
        JobEvent::completed(request.job_id, request.request_id, result, outputs)
    };

    // A job without a github context cannot be handed to the engine; it is
    // finished Failed without touching the setup record.
    if !request.context_data.contains_key("github") {
        error!("missing github context in context data");
        post_event(&plane, &finish(TaskResult::Failed, None)).await;
        stop_renewer(cancel_tx, renewer).await;
        return;
    }

    let ctx = match translate::translate(&request, &job_tenant, &job_token, cache_url.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            fail_init(&plane, &wrap, &request, &format!("{e:#}")).await;
            stop_renewer(cancel_tx, renewer).await;
            return;
        }
    };

    {
        let mut guard = wrap.lock().unwrap();
        let steps = ctx.job().map(|job| job.steps.clone()).unwrap_or_default();
        timeline::append_step_records(&mut guard, request.job_id, &steps);
    }
    patch_timeline(&plane, &wrap).await;

    let state = ExecutionState::new();
    if let Some(job) = ctx.job() {
        for (key, value) in &job.outputs {
            state.set_output(key.clone(), value.clone());
        }
    }

    let (feed_tx, feed_rx) = mpsc::channel(dispatch.settings.feed_capacity);
    let streamer = spawn_streamer(plane.clone(), dispatch.settings.batch_window, feed_rx);
    let formatter = JobLogFormatter::new(
        state.clone(),
        wrap.clone(),
        plane.clone(),
        feed_tx,
        Masker::from_request(&request),
    );

    // The engine runs on its own task so a panic is contained to the job.
    let executor = dispatch.executor.clone();
    let exec_state = state.clone();
    let engine = tokio::spawn(async move {
        let mut formatter = formatter;
        let result = executor.run(&ctx, exec_state, &mut formatter).await;
        (formatter, result)
    });

    let formatter = match engine.await {
        Ok((formatter, Ok(()))) => formatter,
        Ok((formatter, Err(e))) => {
            warn!("engine returned an error: {e:#}");
            state.record_result(state.current_step(), false);
            formatter
        }
        Err(join_error) => {
            let message = panic_message(join_error);
            fail_init(
                &plane,
                &wrap,
                &request,
                &format!("The worker panicked with message: {message}"),
            )
            .await;
            stop_renewer(cancel_tx, renewer).await;
            streamer.await.ok();
            return;
        }
    };

    // Finalize whatever step was last current; dropping the formatter's
    // sender lets the streamer drain and exit.
    let setup_failure = formatter.finish().await;
    streamer.await.ok();

    let succeeded = state.all_succeeded() && !setup_failure;
    {
        let mut guard = wrap.lock().unwrap();
        timeline::skip_unfinished_steps(&mut guard);
        timeline::complete_job_record(&mut guard, succeeded);
    }
    patch_timeline(&plane, &wrap).await;

    let outputs = request.job_outputs.as_ref().map(|_| {
        state
            .outputs()
            .into_iter()
            .map(|(key, value)| (key, VariableValue::plain(value)))
            .collect()
    });
    let result = if succeeded {
        TaskResult::Succeeded
    } else {
        TaskResult::Failed
    };
    post_event(&plane, &finish(result, outputs)).await;
    stop_renewer(cancel_tx, renewer).await;

    info!(
        "finished job {} (request {}): {:?}",
        request.job_display_name, request.request_id, result
    );
}

/// Reports a failure that happened before the engine took over: the
/// message becomes the setup log, setup and job complete Failed, and the
/// job is finished.
async fn fail_init(
    plane: &Arc<dyn JobPlane>,
    wrap: &Arc<Mutex<TimelineRecordWrapper>>,
    request: &AgentJobRequest,
    message: &str,
) {
    error!("job initialization failed: {message}");
    let log_id = match plane.upload_log(message.to_string()).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("failed to upload init failure log: {e:#}");
            None
        }
    };
    {
        let mut guard = wrap.lock().unwrap();
        if let Some(id) = log_id {
            guard.value[SETUP_RECORD].log = Some(TaskLogReference { id });
        }
        guard.value[SETUP_RECORD].complete(TaskResult::Failed);
        guard.value[JOB_RECORD].complete(TaskResult::Failed);
    }
    patch_timeline(plane, wrap).await;
    post_event(
        plane,
        &JobEvent::completed(request.job_id, request.request_id, TaskResult::Failed, None),
    )
    .await;
}

async fn patch_timeline(plane: &Arc<dyn JobPlane>, wrap: &Arc<Mutex<TimelineRecordWrapper>>) {
    let snapshot = wrap.lock().unwrap().clone();
    if let Err(e) = plane.update_timeline(&snapshot).await {
        warn!("failed to update timeline: {e:#}");
    }
}

async fn post_event(plane: &Arc<dyn JobPlane>, event: &JobEvent) {
    if let Err(e) = plane.post_job_event(event).await {
        warn!("failed to post job event: {e:#}");
    }
}

async fn stop_renewer(cancel: watch::Sender<bool>, renewer: tokio::task::JoinHandle<()>) {
    let _ = cancel.send(true);
    renewer.await.ok();
}

fn panic_message(error: tokio::task::JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                message.to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "unknown panic payload".to_string()
            }
        }
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::plane::{JobPlane, PlaneProvider};
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use uuid::Uuid;

    use gantry_core::message::{JobEvent, PlanReference};
    use gantry_core::timeline::{FeedLinesWrapper, TimelineRecordWrapper};
    use gantry_engine::{ExecutionState, Executor, LogEntry, LogSink, RunContext};

    /// Records everything a job sends to the control plane.
    #[derive(Default)]
    pub struct RecordingPlane {
        pub timelines: Mutex<Vec<TimelineRecordWrapper>>,
        pub logs: Mutex<Vec<String>>,
        pub batches: Mutex<Vec<FeedLinesWrapper>>,
        pub events: Mutex<Vec<JobEvent>>,
    }

    #[async_trait]
    impl JobPlane for RecordingPlane {
        async fn update_timeline(&self, records: &TimelineRecordWrapper) -> Result<()> {
            self.timelines.lock().unwrap().push(records.clone());
            Ok(())
        }

        async fn upload_log(&self, content: String) -> Result<i32> {
            let mut logs = self.logs.lock().unwrap();
            logs.push(content);
            Ok(logs.len() as i32)
        }

        async fn post_feed_lines(&self, lines: &FeedLinesWrapper) -> Result<()> {
            self.batches.lock().unwrap().push(lines.clone());
            Ok(())
        }

        async fn post_job_event(&self, event: &JobEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Provider that hands out one shared recording plane.
    pub struct FixedPlaneProvider(pub Arc<RecordingPlane>);

    #[async_trait]
    impl PlaneProvider for FixedPlaneProvider {
        async fn job_plane(
            &self,
            _tenant_url: &str,
            _token: &str,
            _plan: &PlanReference,
            _timeline_id: Uuid,
        ) -> Result<Arc<dyn JobPlane>> {
            Ok(self.0.clone())
        }
    }

    /// What a scripted fake engine does, in order.
    #[allow(dead_code)]
    pub enum FakeAction {
        Step {
            id: String,
            lines: Vec<String>,
            success: bool,
        },
        Output {
            key: String,
            value: String,
        },
        Panic(String),
    }

    /// An engine that replays a fixed script against the shared state.
    pub struct FakeExecutor {
        pub actions: Vec<FakeAction>,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn run(
            &self,
            _ctx: &RunContext,
            state: Arc<ExecutionState>,
            sink: &mut (dyn LogSink + Send),
        ) -> Result<()> {
            for action in &self.actions {
                match action {
                    FakeAction::Step { id, lines, success } => {
                        state.set_current_step(id.clone());
                        for line in lines {
                            sink.observe(&LogEntry::line(line.clone())).await;
                        }
                        state.record_result(id.clone(), *success);
                    }
                    FakeAction::Output { key, value } => {
                        state.set_output(key.clone(), value.clone());
                    }
                    FakeAction::Panic(message) => panic!("{message}"),
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeAction, FakeExecutor, FixedPlaneProvider, RecordingPlane};
    use super::*;
    use std::collections::HashMap;

    use gantry_client::location::ConnectionData;
    use gantry_core::agent::AccessToken;
    use gantry_core::context::PipelineContextData;
    use gantry_core::message::{
        ActionStep, ActionStepReference, EndpointAuthorization, JobEndpoint, JobResources,
    };
    use gantry_core::template::{MapEntry, TemplateToken};
    use gantry_core::timeline::TimelineState;
    use uuid::Uuid;

    fn dispatch(
        plane: Arc<RecordingPlane>,
        executor: Arc<dyn Executor>,
    ) -> JobDispatch {
        let mut settings = RunnerSettings::in_dir(".");
        settings.batch_window = std::time::Duration::from_millis(50);
        JobDispatch {
            settings,
            runner_client: TenantClient::with_connection(
                reqwest::Client::new(),
                "https://runner.example.test",
                ConnectionData::default(),
            ),
            http: reqwest::Client::new(),
            token: SharedToken::new(AccessToken {
                access_token: "runner-token".to_string(),
                expires_in: 3600,
                token_type: "Bearer".to_string(),
            }),
            authorizer: Arc::new(
                Authorizer::new("client", "https://auth.example.test", &[]).unwrap(),
            ),
            executor,
            planes: Arc::new(FixedPlaneProvider(plane)),
        }
    }

    fn job_request() -> AgentJobRequest {
        let mut request: AgentJobRequest = serde_json::from_value(serde_json::json!({
            "plan": {"scopeIdentifier": "scope", "planId": "plan", "planType": "free"},
            "timeline": {"id": Uuid::new_v4()},
            "jobId": Uuid::new_v4(),
            "jobDisplayName": "build",
            "jobName": "build",
            "requestId": 7
        }))
        .unwrap();
        request.resources = Some(JobResources {
            endpoints: vec![JobEndpoint {
                name: "SystemVssConnection".to_string(),
                url: "https://runner.example.test".to_string(),
                data: HashMap::new(),
                authorization: EndpointAuthorization {
                    parameters: HashMap::from([(
                        "AccessToken".to_string(),
                        "job-token".to_string(),
                    )]),
                    scheme: "OAuth".to_string(),
                },
            }],
        });
        request.context_data.insert(
            "github".to_string(),
            PipelineContextData::dictionary(vec![
                ("event_name".to_string(), PipelineContextData::string("push")),
                ("workflow".to_string(), PipelineContextData::string("ci")),
                (
                    "server_url".to_string(),
                    PipelineContextData::string("https://github.example.test"),
                ),
            ]),
        );
        request.steps.push(ActionStep {
            reference: ActionStepReference {
                step_type: "script".to_string(),
                ..Default::default()
            },
            context_name: "step1".to_string(),
            inputs: Some(TemplateToken::mapping(vec![MapEntry {
                key: TemplateToken::literal("script"),
                value: TemplateToken::literal("echo hi"),
            }])),
            ..Default::default()
        });
        request
    }

    #[tokio::test]
    async fn test_happy_script_job_succeeds() {
        let plane = Arc::new(RecordingPlane::default());
        let executor = Arc::new(FakeExecutor {
            actions: vec![FakeAction::Step {
                id: "step1".to_string(),
                lines: vec!["hi".to_string()],
                success: true,
            }],
        });

        run_job(dispatch(plane.clone(), executor), job_request()).await;

        let timelines = plane.timelines.lock().unwrap();
        let last = timelines.last().unwrap();
        assert_eq!(last.value.len(), 3);
        assert!(last.value.iter().all(|r| r.state == TimelineState::Completed));
        assert!(last
            .value
            .iter()
            .all(|r| r.result == Some(TaskResult::Succeeded)));

        let events = plane.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "JobCompleted");
        assert_eq!(events[0].result, TaskResult::Succeeded);
        assert!(events[0].outputs.is_none());
    }

    #[tokio::test]
    async fn test_secret_values_never_reach_the_feed() {
        let mut request = job_request();
        request.variables.insert(
            "api_key".to_string(),
            gantry_core::message::VariableValue::secret("abcd1234"),
        );

        let plane = Arc::new(RecordingPlane::default());
        let executor = Arc::new(FakeExecutor {
            actions: vec![FakeAction::Step {
                id: "step1".to_string(),
                lines: vec!["token is abcd1234".to_string()],
                success: true,
            }],
        });

        run_job(dispatch(plane.clone(), executor), request).await;

        let batches = plane.batches.lock().unwrap();
        assert!(!batches.is_empty());
        assert!(batches
            .iter()
            .flat_map(|batch| batch.value.iter())
            .all(|line| !line.contains("abcd1234")));
        assert!(batches
            .iter()
            .flat_map(|batch| batch.value.iter())
            .any(|line| line.contains("***")));

        let logs = plane.logs.lock().unwrap();
        assert!(logs.iter().all(|log| !log.contains("abcd1234")));
    }

    #[tokio::test]
    async fn test_non_map_matrix_fails_setup() {
        let mut request = job_request();
        request
            .context_data
            .insert("matrix".to_string(), PipelineContextData::number(5.0));

        let plane = Arc::new(RecordingPlane::default());
        let executor = Arc::new(FakeExecutor { actions: vec![] });

        run_job(dispatch(plane.clone(), executor), request).await;

        let logs = plane.logs.lock().unwrap();
        assert!(logs.iter().any(|log| log.contains("matrix: not a map")));

        let timelines = plane.timelines.lock().unwrap();
        let last = timelines.last().unwrap();
        assert_eq!(last.value[SETUP_RECORD].result, Some(TaskResult::Failed));
        assert_eq!(last.value[JOB_RECORD].result, Some(TaskResult::Failed));
        assert!(last.value[SETUP_RECORD].log.is_some());

        let events = plane.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].result, TaskResult::Failed);
    }

    #[tokio::test]
    async fn test_declared_outputs_flow_into_completion_event() {
        let mut request = job_request();
        request.job_outputs = Some(TemplateToken::mapping(vec![MapEntry {
            key: TemplateToken::literal("built"),
            value: TemplateToken::literal("${{ steps.x.outputs.artifact }}"),
        }]));

        let plane = Arc::new(RecordingPlane::default());
        let executor = Arc::new(FakeExecutor {
            actions: vec![
                FakeAction::Step {
                    id: "step1".to_string(),
                    lines: vec!["building".to_string()],
                    success: true,
                },
                FakeAction::Output {
                    key: "built".to_string(),
                    value: "pkg-1.2.tgz".to_string(),
                },
            ],
        });

        run_job(dispatch(plane.clone(), executor), request).await;

        let events = plane.events.lock().unwrap();
        let outputs = events[0].outputs.as_ref().unwrap();
        assert_eq!(outputs["built"].value, "pkg-1.2.tgz");
        assert_eq!(events[0].result, TaskResult::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_step_fails_job_and_skips_the_rest() {
        let mut request = job_request();
        request.steps.push(ActionStep {
            reference: ActionStepReference {
                step_type: "script".to_string(),
                ..Default::default()
            },
            context_name: "step2".to_string(),
            inputs: Some(TemplateToken::mapping(vec![MapEntry {
                key: TemplateToken::literal("script"),
                value: TemplateToken::literal("echo unreachable"),
            }])),
            ..Default::default()
        });

        let plane = Arc::new(RecordingPlane::default());
        let executor = Arc::new(FakeExecutor {
            actions: vec![FakeAction::Step {
                id: "step1".to_string(),
                lines: vec!["boom".to_string()],
                success: false,
            }],
        });

        run_job(dispatch(plane.clone(), executor), request).await;

        let timelines = plane.timelines.lock().unwrap();
        let last = timelines.last().unwrap();
        assert_eq!(last.value[2].result, Some(TaskResult::Failed));
        assert_eq!(last.value[3].result, Some(TaskResult::Skipped));
        assert_eq!(last.value[JOB_RECORD].result, Some(TaskResult::Failed));

        let events = plane.events.lock().unwrap();
        assert_eq!(events[0].result, TaskResult::Failed);
    }

    #[tokio::test]
    async fn test_engine_panic_reports_init_failure() {
        let plane = Arc::new(RecordingPlane::default());
        let executor = Arc::new(FakeExecutor {
            actions: vec![FakeAction::Panic("engine exploded".to_string())],
        });

        run_job(dispatch(plane.clone(), executor), job_request()).await;

        let logs = plane.logs.lock().unwrap();
        assert!(logs
            .iter()
            .any(|log| log.contains("panicked") && log.contains("engine exploded")));

        let events = plane.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].result, TaskResult::Failed);
    }

    #[tokio::test]
    async fn test_missing_resources_fail_setup() {
        let mut request = job_request();
        request.resources = None;

        let plane = Arc::new(RecordingPlane::default());
        let executor = Arc::new(FakeExecutor { actions: vec![] });

        run_job(dispatch(plane.clone(), executor), request).await;

        let logs = plane.logs.lock().unwrap();
        assert!(logs.iter().any(|log| log.contains("Missing job resources")));
        let events = plane.events.lock().unwrap();
        assert_eq!(events[0].result, TaskResult::Failed);
    }
}
