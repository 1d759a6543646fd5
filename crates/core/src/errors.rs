use thiserror::Error;

/// 任务队列错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务已存在: job '{job_name}' 的相同参数任务已被调度")]
    DuplicateTask { job_name: String },

    #[error("任务 '{job_name}' 未注册")]
    JobNotRegistered { job_name: String },

    #[error("任务名称 '{job_name}' 过长，最多 {max} 个字符")]
    JobNameTooLong { job_name: String, max: usize },

    #[error("任务 '{job_name}' 缺少处理函数")]
    MissingHandler { job_name: String },

    #[error("无效的任务定义 '{job_name}': {message}")]
    InvalidJob { job_name: String, message: String },

    #[error("等待运行中的任务超时，强制停止")]
    ShutdownTimeout,

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 相同 (job, args) 的任务已经在队列中
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SchedulerError::DuplicateTask { .. })
    }

    /// 注册或调度阶段同步返回的配置类错误
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SchedulerError::JobNameTooLong { .. }
                | SchedulerError::MissingHandler { .. }
                | SchedulerError::InvalidJob { .. }
                | SchedulerError::JobNotRegistered { .. }
                | SchedulerError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
