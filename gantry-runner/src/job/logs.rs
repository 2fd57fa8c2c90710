//! Log formatting and streaming
//!
//! The formatter observes every engine log entry: it detects step
//! transitions via the shared execution state, finalizes the step that
//! just ended (result, whole-log upload, timeline PATCH), masks secrets,
//! and emits one feed line per entry with a per-step 1-indexed line
//! number. The streamer coalesces those lines into batches, flushing on a
//! step change or after the batching window, which bounds the request rate
//! while keeping perceived latency within the window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use gantry_core::message::AgentJobRequest;
use gantry_core::timeline::{
    FeedLinesWrapper, TaskLogReference, TaskResult, TimelineRecordWrapper,
};
use gantry_engine::{ExecutionState, LogEntry, LogSink};

use super::plane::JobPlane;
use super::timeline::SETUP_RECORD;

/// Replacement for masked content.
const MASK: &str = "***";

/// Masks secret values and mask-hint patterns out of log lines.
pub struct Masker {
    patterns: Vec<Regex>,
    literals: Vec<String>,
}

impl Masker {
    pub fn from_request(request: &AgentJobRequest) -> Self {
        let mut patterns = Vec::new();
        for hint in &request.mask_hints {
            if hint.hint_type.eq_ignore_ascii_case("regex") {
                match Regex::new(&hint.value) {
                    Ok(pattern) => patterns.push(pattern),
                    Err(e) => warn!("ignoring unparsable mask hint: {e}"),
                }
            }
        }
        let literals = request
            .variables
            .values()
            .filter(|variable| variable.is_secret && !variable.value.is_empty())
            .map(|variable| variable.value.clone())
            .collect();
        Self { patterns, literals }
    }

    pub fn mask(&self, line: &str) -> String {
        let mut masked = line.to_string();
        for pattern in &self.patterns {
            masked = pattern.replace_all(&masked, MASK).into_owned();
        }
        for literal in &self.literals {
            masked = masked.replace(literal, MASK);
        }
        masked
    }
}

/// One masked console line on its way to the feed.
#[derive(Debug)]
pub struct FeedLine {
    pub step_id: Uuid,
    pub start_line: i64,
    pub line: String,
}

/// The [`LogSink`] wired between engine and control plane.
pub struct JobLogFormatter {
    state: Arc<ExecutionState>,
    wrap: Arc<Mutex<TimelineRecordWrapper>>,
    plane: Arc<dyn JobPlane>,
    feed: mpsc::Sender<FeedLine>,
    masker: Masker,
    current: Option<usize>,
    start_line: i64,
    step_buffer: String,
}

impl JobLogFormatter {
    pub fn new(
        state: Arc<ExecutionState>,
        wrap: Arc<Mutex<TimelineRecordWrapper>>,
        plane: Arc<dyn JobPlane>,
        feed: mpsc::Sender<FeedLine>,
        masker: Masker,
    ) -> Self {
        Self {
            state,
            wrap,
            plane,
            feed,
            masker,
            current: Some(SETUP_RECORD),
            start_line: 1,
            step_buffer: String::new(),
        }
    }

    /// Completes the record the formatter is positioned on and uploads its
    /// accumulated log. Without a forced result, the step-result map
    /// decides between Succeeded and Failed.
    async fn finalize_current(&mut self, forced: Option<TaskResult>) {
        let Some(index) = self.current else {
            return;
        };
        let result = match forced {
            Some(result) => result,
            None => {
                let ref_name = self.wrap.lock().unwrap().value[index].ref_name.clone();
                let success = self
                    .state
                    .step_result(&ref_name)
                    .map(|result| result.success)
                    .unwrap_or(false);
                if success {
                    TaskResult::Succeeded
                } else {
                    TaskResult::Failed
                }
            }
        };
        self.wrap.lock().unwrap().value[index].complete(result);

        let buffer = std::mem::take(&mut self.step_buffer);
        if !buffer.is_empty() {
            match self.plane.upload_log(buffer).await {
                Ok(id) => {
                    self.wrap.lock().unwrap().value[index].log = Some(TaskLogReference { id });
                }
                Err(e) => warn!("failed to upload step log: {e:#}"),
            }
        }
    }

    /// Moves to the record of the step now executing and PATCHes the
    /// timeline so the transition is visible.
    async fn advance_to(&mut self, step_ref: &str) {
        self.start_line = 1;
        self.finalize_current(None).await;

        let next = {
            let wrap = self.wrap.lock().unwrap();
            wrap.value
                .iter()
                .position(|record| record.ref_name == step_ref)
        };
        if let Some(index) = next {
            self.wrap.lock().unwrap().value[index].start();
            self.current = Some(index);
        }

        let snapshot = self.wrap.lock().unwrap().clone();
        if let Err(e) = self.plane.update_timeline(&snapshot).await {
            warn!("failed to update timeline: {e:#}");
        }
    }

    /// End-of-run finalization of whatever step is still current.
    ///
    /// Returns true when that step was still `__setup`, which means
    /// initialization itself failed and the job must be reported Failed.
    pub async fn finish(mut self) -> bool {
        let setup_still_current = self.current == Some(SETUP_RECORD);
        let forced = setup_still_current.then_some(TaskResult::Failed);
        self.finalize_current(forced).await;
        setup_still_current
    }
}

#[async_trait]
impl LogSink for JobLogFormatter {
    async fn observe(&mut self, entry: &LogEntry) {
        let current_step = self.state.current_step();
        let stale = match self.current {
            Some(index) => self.wrap.lock().unwrap().value[index].ref_name != current_step,
            None => true,
        };
        if stale {
            self.advance_to(&current_step).await;
        }

        let masked = self.masker.mask(&entry.message);
        if let Some(index) = self.current {
            let step_id = self.wrap.lock().unwrap().value[index].id;
            let line = masked.trim_matches(['\r', '\n']).to_string();
            let feed_line = FeedLine {
                step_id,
                start_line: self.start_line,
                line,
            };
            // A full channel back-pressures the engine through this await.
            if self.feed.send(feed_line).await.is_err() {
                debug!("log feed closed, dropping line");
            }
            self.start_line += 1;
        }

        self.step_buffer.push_str(&masked);
        if !entry.raw_output {
            self.step_buffer.push('\n');
        }
    }
}

/// Spawns the batch-and-post loop; ends when all senders are gone.
pub fn spawn_streamer(
    plane: Arc<dyn JobPlane>,
    window: Duration,
    mut feed: mpsc::Receiver<FeedLine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(first) = feed.recv().await {
            let mut batch = batch_from(first);
            let mut deadline = tokio::time::Instant::now() + window;
            loop {
                match tokio::time::timeout_at(deadline, feed.recv()).await {
                    Ok(Some(line)) if line.step_id == batch.step_id => {
                        batch.count += 1;
                        batch.value.push(line.line);
                    }
                    Ok(Some(line)) => {
                        post_batch(&plane, &batch).await;
                        batch = batch_from(line);
                        deadline = tokio::time::Instant::now() + window;
                    }
                    Ok(None) => {
                        post_batch(&plane, &batch).await;
                        return;
                    }
                    Err(_elapsed) => break,
                }
            }
            post_batch(&plane, &batch).await;
        }
    })
}

fn batch_from(line: FeedLine) -> FeedLinesWrapper {
    FeedLinesWrapper {
        count: 1,
        value: vec![line.line],
        step_id: line.step_id,
        start_line: Some(line.start_line),
    }
}

async fn post_batch(plane: &Arc<dyn JobPlane>, batch: &FeedLinesWrapper) {
    if let Err(e) = plane.post_feed_lines(batch).await {
        warn!("failed to post log lines: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::testing::RecordingPlane;
    use crate::job::timeline::{append_step_records, initial_records, JOB_RECORD};
    use gantry_core::message::{MaskHint, VariableValue};
    use gantry_core::timeline::TimelineState;
    use gantry_engine::model::Step;

    fn masked_request(secret: &str) -> AgentJobRequest {
        let mut request: AgentJobRequest = serde_json::from_value(serde_json::json!({
            "plan": {"scopeIdentifier": "s", "planId": "p", "planType": "free"},
            "timeline": {"id": Uuid::new_v4()},
            "jobId": Uuid::new_v4(),
            "jobDisplayName": "build",
            "jobName": "build",
            "requestId": 1
        }))
        .unwrap();
        request
            .variables
            .insert("api_key".to_string(), VariableValue::secret(secret));
        request.mask_hints.push(MaskHint {
            hint_type: "regex".to_string(),
            value: "gh[sp]_[A-Za-z0-9]+".to_string(),
        });
        request
    }

    #[test]
    fn test_masker_hides_literals_and_patterns() {
        let masker = Masker::from_request(&masked_request("abcd1234"));
        assert_eq!(
            masker.mask("token abcd1234 and ghs_SECRET99 here"),
            "token *** and *** here"
        );
        assert_eq!(masker.mask("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn test_masker_leaves_no_secret_substring() {
        let masker = Masker::from_request(&masked_request("s3cr3t"));
        let masked = masker.mask("prefix s3cr3ts3cr3t suffix s3cr3t");
        assert!(!masked.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_streamer_coalesces_one_step() {
        let plane = Arc::new(RecordingPlane::default());
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn_streamer(plane.clone(), Duration::from_millis(200), rx);

        let step = Uuid::new_v4();
        for (line_no, text) in ["one", "two", "three"].iter().enumerate() {
            tx.send(FeedLine {
                step_id: step,
                start_line: line_no as i64 + 1,
                line: text.to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let batches = plane.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].value, vec!["one", "two", "three"]);
        assert_eq!(batches[0].start_line, Some(1));
        assert_eq!(batches[0].count, 3);
    }

    #[tokio::test]
    async fn test_streamer_flushes_on_step_change() {
        let plane = Arc::new(RecordingPlane::default());
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn_streamer(plane.clone(), Duration::from_millis(200), rx);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        for (step, start_line, text) in
            [(first, 1, "a1"), (first, 2, "a2"), (second, 1, "b1")]
        {
            tx.send(FeedLine {
                step_id: step,
                start_line,
                line: text.to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let batches = plane.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].step_id, first);
        assert_eq!(batches[0].value, vec!["a1", "a2"]);
        assert_eq!(batches[1].step_id, second);
        assert_eq!(batches[1].start_line, Some(1));
    }

    #[tokio::test]
    async fn test_formatter_advances_and_numbers_lines() {
        let request = masked_request("abcd1234");
        let mut wrap = initial_records(&request);
        append_step_records(
            &mut wrap,
            request.job_id,
            &[Step {
                id: "step1".to_string(),
                run: Some("echo".to_string()),
                ..Default::default()
            }],
        );
        let wrap = Arc::new(Mutex::new(wrap));
        let plane = Arc::new(RecordingPlane::default());
        let state = ExecutionState::new();
        let (tx, mut rx) = mpsc::channel(16);

        let mut formatter = JobLogFormatter::new(
            state.clone(),
            wrap.clone(),
            plane.clone(),
            tx,
            Masker::from_request(&request),
        );

        formatter.observe(&LogEntry::line("setting up")).await;
        state.set_current_step("step1");
        state.record_result("step1", true);
        formatter.observe(&LogEntry::line("printing abcd1234")).await;
        formatter.observe(&LogEntry::line("done")).await;
        let setup_failure = formatter.finish().await;
        assert!(!setup_failure);

        // Setup finalized Succeeded with its log uploaded; step1 Completed.
        {
            let wrap = wrap.lock().unwrap();
            assert_eq!(wrap.value[SETUP_RECORD].state, TimelineState::Completed);
            assert_eq!(wrap.value[SETUP_RECORD].result, Some(TaskResult::Succeeded));
            assert!(wrap.value[SETUP_RECORD].log.is_some());
            assert_eq!(wrap.value[2].state, TimelineState::Completed);
            assert_eq!(wrap.value[2].result, Some(TaskResult::Succeeded));
            assert_eq!(wrap.value[JOB_RECORD].state, TimelineState::InProgress);
        }

        // Feed lines are masked and numbered per step from 1.
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].start_line, 1);
        assert_eq!(lines[0].line, "setting up");
        assert_eq!(lines[1].start_line, 1);
        assert_eq!(lines[1].line, "printing ***");
        assert_eq!(lines[2].start_line, 2);

        // The uploaded step log is masked too.
        let logs = plane.logs.lock().unwrap();
        assert!(logs.iter().all(|log| !log.contains("abcd1234")));
        assert!(logs.iter().any(|log| log.contains("printing ***")));
    }

    #[tokio::test]
    async fn test_finish_on_setup_reports_init_failure() {
        let request = masked_request("x");
        let wrap = Arc::new(Mutex::new(initial_records(&request)));
        let plane = Arc::new(RecordingPlane::default());
        let state = ExecutionState::new();
        let (tx, _rx) = mpsc::channel(16);

        let formatter = JobLogFormatter::new(
            state,
            wrap.clone(),
            plane,
            tx,
            Masker::from_request(&request),
        );
        let setup_failure = formatter.finish().await;

        assert!(setup_failure);
        let wrap = wrap.lock().unwrap();
        assert_eq!(wrap.value[SETUP_RECORD].result, Some(TaskResult::Failed));
    }
}
