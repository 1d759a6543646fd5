//! 任务注册、重试策略和调度循环

pub mod args;
pub mod backoff;
pub mod job;
pub mod registry;
pub mod service;
pub mod worker_metrics;

pub use args::{decode_args, encode_args};
pub use backoff::BackoffCurve;
pub use job::{Job, JobCallback, JobContext, JobHandler};
pub use registry::{JobRegistry, RegisteredJob};
pub use service::Worker;
