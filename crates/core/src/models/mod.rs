pub mod task;

pub use task::{Task, TaskConfig, MAX_JOB_NAME_LEN, MAX_RETRIES};
