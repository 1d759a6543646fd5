use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 任务名称的最大长度（与数据库中 `job varchar(20)` 对应）
pub const MAX_JOB_NAME_LEN: usize = 20;

/// 重试次数上限（与数据库中 `tries smallint` 对应）
pub const MAX_RETRIES: u16 = i16::MAX as u16;

/// 持久化的任务记录
///
/// 一条记录代表一次待执行的工作单元。`(job_name, args)` 在存储层唯一，
/// 重复调度会被拒绝而不是合并。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub job_name: String,
    /// 不透明的参数字节，原样传给处理函数
    pub args: Vec<u8>,
    pub scheduled_to: DateTime<Utc>,
    /// 已失败的次数，从0开始
    pub tries: u16,
    pub running: bool,
}

/// 调度任务时由调用方提供的参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskConfig {
    pub job_name: String,
    pub args: Vec<u8>,
    /// 为空时表示立即执行
    pub scheduled_to: Option<DateTime<Utc>>,
}

impl TaskConfig {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: impl Into<Vec<u8>>) -> Self {
        self.args = args.into();
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_to = Some(at);
        self
    }
}

impl Task {
    /// 根据调度参数创建新任务，分配新的ID
    pub fn new(config: TaskConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: config.job_name,
            args: config.args,
            scheduled_to: config.scheduled_to.unwrap_or_else(Utc::now),
            tries: 0,
            running: false,
        }
    }

    /// 当前时间下是否可以被领取
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.running && self.scheduled_to <= now
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}",
            self.job_name,
            self.scheduled_to.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
