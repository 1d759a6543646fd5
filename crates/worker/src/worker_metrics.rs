//! Worker指标
//!
//! 未安装exporter时这些调用都是空操作。

use metrics::{counter, gauge};

pub const TASKS_CLAIMED: &str = "jobqueue_tasks_claimed_total";
pub const TASKS_COMPLETED: &str = "jobqueue_tasks_completed_total";
pub const TASKS_RESCHEDULED: &str = "jobqueue_tasks_rescheduled_total";
pub const TASKS_DISCARDED: &str = "jobqueue_tasks_discarded_total";
pub const POLL_ERRORS: &str = "jobqueue_poll_errors_total";
pub const HANDLERS_IN_FLIGHT: &str = "jobqueue_handlers_in_flight";

pub fn task_claimed(job_name: &str) {
    counter!(TASKS_CLAIMED, "job" => job_name.to_string()).increment(1);
}

pub fn task_completed(job_name: &str) {
    counter!(TASKS_COMPLETED, "job" => job_name.to_string()).increment(1);
}

pub fn task_rescheduled(job_name: &str) {
    counter!(TASKS_RESCHEDULED, "job" => job_name.to_string()).increment(1);
}

pub fn task_discarded(job_name: &str) {
    counter!(TASKS_DISCARDED, "job" => job_name.to_string()).increment(1);
}

pub fn poll_failed() {
    counter!(POLL_ERRORS).increment(1);
}

pub fn handler_started() {
    gauge!(HANDLERS_IN_FLIGHT).increment(1.0);
}

pub fn handler_finished() {
    gauge!(HANDLERS_IN_FLIGHT).decrement(1.0);
}
