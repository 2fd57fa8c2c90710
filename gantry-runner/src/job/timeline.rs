//! Timeline tracking
//!
//! Helpers that keep the job's record list in protocol shape: record 0 is
//! the job, record 1 the synthetic `__setup` step, records 2..N+1 the
//! translated steps, with dense orders and monotonic state transitions.

use uuid::Uuid;

use gantry_core::message::AgentJobRequest;
use gantry_core::timeline::{TaskResult, TimelineRecord, TimelineRecordWrapper};
use gantry_engine::model::Step;

/// Index of the job record.
pub const JOB_RECORD: usize = 0;
/// Index of the synthetic setup record.
pub const SETUP_RECORD: usize = 1;
/// Ref name of the synthetic setup record.
pub const SETUP_REF: &str = "__setup";

/// The initial timeline: job and setup records, both already InProgress.
pub fn initial_records(request: &AgentJobRequest) -> TimelineRecordWrapper {
    let mut job = TimelineRecord::new(None, &request.job_name, &request.job_display_name);
    job.id = request.job_id;
    job.record_type = "Job".to_string();
    job.order = 0;
    job.start();

    let mut setup = TimelineRecord::new(Some(request.job_id), SETUP_REF, "Setup Job");
    setup.order = 1;
    setup.start();

    TimelineRecordWrapper::new(vec![job, setup])
}

/// Appends one Pending record per translated step, orders 2..N+1.
pub fn append_step_records(wrap: &mut TimelineRecordWrapper, job_id: Uuid, steps: &[Step]) {
    for (index, step) in steps.iter().enumerate() {
        let mut record = TimelineRecord::new(Some(job_id), &step.id, step.display());
        record.order = (index + 2) as i32;
        wrap.value.push(record);
    }
    wrap.sync_count();
}

/// Completes every step record that never finished as Skipped.
///
/// Records already Completed keep whatever result they carry.
pub fn skip_unfinished_steps(wrap: &mut TimelineRecordWrapper) {
    for record in wrap.value.iter_mut().skip(SETUP_RECORD + 1) {
        if !record.is_completed() {
            record.complete(TaskResult::Skipped);
        }
    }
}

/// Completes the job record from the aggregate result.
pub fn complete_job_record(wrap: &mut TimelineRecordWrapper, succeeded: bool) {
    let result = if succeeded {
        TaskResult::Succeeded
    } else {
        TaskResult::Failed
    };
    wrap.value[JOB_RECORD].complete(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::message::{PlanReference, TimelineReference};
    use gantry_core::timeline::TimelineState;

    fn request() -> AgentJobRequest {
        serde_json::from_value(serde_json::json!({
            "plan": PlanReference::default(),
            "timeline": TimelineReference { id: Uuid::new_v4(), change_id: 0 },
            "jobId": Uuid::new_v4(),
            "jobDisplayName": "build things",
            "jobName": "build",
            "requestId": 9
        }))
        .unwrap()
    }

    fn step(id: &str) -> Step {
        Step {
            id: id.to_string(),
            run: Some(format!("echo {id}")),
            ..Default::default()
        }
    }

    #[test]
    fn test_orders_are_dense_from_zero() {
        let request = request();
        let mut wrap = initial_records(&request);
        append_step_records(&mut wrap, request.job_id, &[step("a"), step("b"), step("c")]);

        let orders: Vec<i32> = wrap.value.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
        assert_eq!(wrap.count, 5);
        assert_eq!(wrap.value[JOB_RECORD].record_type, "Job");
        assert_eq!(wrap.value[SETUP_RECORD].ref_name, SETUP_REF);
        assert_eq!(wrap.value[JOB_RECORD].id, request.job_id);
    }

    #[test]
    fn test_initial_records_are_in_progress() {
        let wrap = initial_records(&request());
        assert_eq!(wrap.value[JOB_RECORD].state, TimelineState::InProgress);
        assert_eq!(wrap.value[SETUP_RECORD].state, TimelineState::InProgress);
        assert!(wrap.value[2..].is_empty());
    }

    #[test]
    fn test_skip_leaves_completed_records_alone() {
        let request = request();
        let mut wrap = initial_records(&request);
        append_step_records(&mut wrap, request.job_id, &[step("a"), step("b")]);

        wrap.value[2].start();
        wrap.value[2].complete(TaskResult::Failed);
        skip_unfinished_steps(&mut wrap);

        assert_eq!(wrap.value[2].result, Some(TaskResult::Failed));
        assert_eq!(wrap.value[3].result, Some(TaskResult::Skipped));
    }

    #[test]
    fn test_job_record_completion() {
        let request = request();
        let mut wrap = initial_records(&request);
        complete_job_record(&mut wrap, true);
        assert_eq!(wrap.value[JOB_RECORD].result, Some(TaskResult::Succeeded));

        let mut wrap = initial_records(&request);
        complete_job_record(&mut wrap, false);
        assert_eq!(wrap.value[JOB_RECORD].result, Some(TaskResult::Failed));
    }
}
