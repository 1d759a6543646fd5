//! jobqueue 核心抽象
//!
//! 包含任务模型、队列存储接口、统一错误类型、配置加载和日志初始化。
//! 其他crate（worker、infrastructure）只依赖这里定义的类型。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{AppConfig, DatabaseConfig, ObservabilityConfig, WorkerConfig};
pub use errors::SchedulerError;
pub use logging::{init_from_config, init_logging, LogFormat};
pub use models::{Task, TaskConfig, MAX_JOB_NAME_LEN, MAX_RETRIES};
pub use traits::Queue;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
