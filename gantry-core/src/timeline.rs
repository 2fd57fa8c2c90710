//! Timeline records
//!
//! The control plane tracks a job as an ordered list of timeline records:
//! record 0 is the job itself, record 1 the synthetic setup step, and one
//! record per translated step after that. Records move Pending →
//! InProgress → Completed and never re-enter an earlier state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution state of a timeline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineState {
    Pending,
    InProgress,
    Completed,
}

/// Final result of a completed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskResult {
    Succeeded,
    Failed,
    Skipped,
}

/// Reference to an uploaded per-step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogReference {
    pub id: i32,
}

/// A server-side log file; created empty, then filled with raw text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLog {
    #[serde(default)]
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub created_on: String,
    pub last_changed_on: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_count: Option<i64>,
}

/// One entry of a job timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRecord {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub ref_name: String,
    pub order: i32,
    pub state: TimelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<String>,
    pub percent_complete: i32,
    pub worker_name: String,
    pub last_modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<TaskLogReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<i32>,
}

impl TimelineRecord {
    /// Creates a Pending task record under the given parent.
    pub fn new(parent: Option<Uuid>, ref_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: parent,
            record_type: "Task".to_string(),
            name: name.into(),
            ref_name: ref_name.into(),
            order: 1,
            state: TimelineState::Pending,
            result: None,
            start_time: None,
            finish_time: None,
            percent_complete: 0,
            worker_name: "gantry".to_string(),
            last_modified: timestamp(),
            log: None,
            attempt: None,
        }
    }

    /// Moves the record to InProgress and stamps its start time.
    pub fn start(&mut self) {
        let now = timestamp();
        self.state = TimelineState::InProgress;
        self.percent_complete = 0;
        self.start_time = Some(now.clone());
        self.finish_time = None;
        self.last_modified = now;
    }

    /// Completes the record with the given result.
    pub fn complete(&mut self, result: TaskResult) {
        let now = timestamp();
        self.state = TimelineState::Completed;
        self.percent_complete = 100;
        self.finish_time = Some(now.clone());
        self.last_modified = now;
        self.result = Some(result);
    }

    pub fn is_completed(&self) -> bool {
        self.state == TimelineState::Completed
    }
}

/// The full record list as PATCHed to the timeline endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRecordWrapper {
    pub count: i64,
    pub value: Vec<TimelineRecord>,
}

impl TimelineRecordWrapper {
    pub fn new(value: Vec<TimelineRecord>) -> Self {
        Self {
            count: value.len() as i64,
            value,
        }
    }

    /// Keeps `count` in sync after the record list changed.
    pub fn sync_count(&mut self) {
        self.count = self.value.len() as i64;
    }
}

/// A batch of console lines for one step, posted to the record feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedLinesWrapper {
    pub count: i64,
    pub value: Vec<String>,
    pub step_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<i64>,
}

/// Wire timestamp: UTC to second precision, no zone suffix.
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let mut record = TimelineRecord::new(None, "__setup", "Setup Job");
        assert_eq!(record.state, TimelineState::Pending);
        assert!(record.start_time.is_none());

        record.start();
        assert_eq!(record.state, TimelineState::InProgress);
        assert!(record.start_time.is_some());
        assert!(record.finish_time.is_none());

        record.complete(TaskResult::Succeeded);
        assert_eq!(record.state, TimelineState::Completed);
        assert_eq!(record.result, Some(TaskResult::Succeeded));
        assert_eq!(record.percent_complete, 100);
        assert!(record.finish_time.is_some());
    }

    #[test]
    fn test_states_serialize_as_wire_strings() {
        assert_eq!(
            serde_json::to_string(&TimelineState::InProgress).unwrap(),
            "\"InProgress\""
        );
        assert_eq!(
            serde_json::to_string(&TaskResult::Succeeded).unwrap(),
            "\"Succeeded\""
        );
    }

    #[test]
    fn test_wrapper_counts_records() {
        let records = vec![
            TimelineRecord::new(None, "job", "Job"),
            TimelineRecord::new(None, "__setup", "Setup Job"),
        ];
        let mut wrap = TimelineRecordWrapper::new(records);
        assert_eq!(wrap.count, 2);

        wrap.value.push(TimelineRecord::new(None, "step1", "step"));
        wrap.sync_count();
        assert_eq!(wrap.count, 3);
    }

    #[test]
    fn test_timestamp_is_second_precision() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), 19);
        assert!(!stamp.ends_with('Z'));
    }
}
