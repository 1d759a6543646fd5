//! 内置任务

use jobqueue_worker::{Job, JobContext};
use tracing::info;

pub const LOG_MESSAGE_JOB: &str = "log-message";

/// 把参数按UTF-8文本写入日志
pub fn log_message_job() -> Job {
    Job::new(LOG_MESSAGE_JOB)
        .with_handler(|ctx: JobContext, args: Vec<u8>| async move {
            let message = String::from_utf8_lossy(&args);
            info!(
                "[{}] task {} (try {}): {}",
                ctx.job_name,
                ctx.task_id,
                u32::from(ctx.tries) + 1,
                message
            );
            Ok(())
        })
        .with_retries(3)
}

pub fn builtin_jobs() -> Vec<Job> {
    vec![log_message_job()]
}
