//! 队列存储操作的错误处理
//!
//! 为每次存储操作附加上下文（操作类型、任务ID、任务名称），
//! 在返回错误之前统一记录日志，并把唯一约束冲突转换为 `DuplicateTask`。

use chrono::{DateTime, Utc};
use jobqueue_core::{SchedulerError, Task};
use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Operation context for queue storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOperation {
    Enqueue,
    Poll,
    Reschedule,
    Dequeue,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Enqueue => write!(f, "入队"),
            RepositoryOperation::Poll => write!(f, "领取"),
            RepositoryOperation::Reschedule => write!(f, "重新调度"),
            RepositoryOperation::Dequeue => write!(f, "删除"),
        }
    }
}

/// Context information for task storage operations
#[derive(Debug, Clone)]
pub struct TaskOperationContext {
    pub operation: RepositoryOperation,
    pub task_id: Option<Uuid>,
    pub job_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            task_id: None,
            job_name: None,
            timestamp: Utc::now(),
        }
    }

    /// 从任务记录中提取ID和名称
    pub fn for_task(operation: RepositoryOperation, task: &Task) -> Self {
        Self::new(operation)
            .with_task_id(task.id)
            .with_job_name(task.job_name.clone())
    }

    pub fn with_task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_job_name(mut self, job_name: String) -> Self {
        self.job_name = Some(job_name);
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.task_id, &self.job_name) {
            (Some(id), Some(name)) => format!("任务 '{}' (ID: {})", name, id),
            (Some(id), None) => format!("任务 (ID: {})", id),
            (None, Some(name)) => format!("任务 '{}'", name),
            (None, None) => "任务".to_string(),
        }
    }
}

/// Repository error helpers
pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// 把sqlx错误转换为带上下文的调度器错误
    #[instrument(skip_all, fields(
        operation = %context.operation,
        task_id = ?context.task_id,
    ))]
    pub fn task_database_error(context: TaskOperationContext, error: SqlxError) -> SchedulerError {
        let entity_desc = context.entity_description();
        let operation_desc = context.operation.to_string();

        if let SqlxError::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                let job_name = context.job_name.clone().unwrap_or_default();
                error!(
                    error = %error,
                    constraint = db_error.constraint().unwrap_or("unknown"),
                    "{}{}时发生唯一约束冲突: 相同参数的任务已存在",
                    operation_desc,
                    entity_desc
                );
                return SchedulerError::DuplicateTask { job_name };
            }
        }

        error!(error = %error, "{}{}时发生数据库错误", operation_desc, entity_desc);
        SchedulerError::DatabaseOperation(format!(
            "{}{}失败: {}",
            operation_desc, entity_desc, error
        ))
    }

    /// 行数据无法转换为任务模型
    pub fn task_mapping_error(context: TaskOperationContext, message: impl fmt::Display) -> SchedulerError {
        let msg = format!(
            "{}{}时数据转换失败: {}",
            context.operation,
            context.entity_description(),
            message
        );
        error!("{}", msg);
        SchedulerError::DatabaseOperation(msg)
    }

    pub fn log_operation_success(context: &TaskOperationContext, additional_info: Option<&str>) {
        let base_msg = format!("{}{}成功", context.operation, context.entity_description());

        if let Some(info) = additional_info {
            debug!("{}: {}", base_msg, info);
        } else {
            debug!("{}", base_msg);
        }
    }
}

/// Macro for creating task operation context easily
#[macro_export]
macro_rules! task_context {
    ($operation:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation)
    };
    ($operation:expr, task = $task:expr) => {
        $crate::error_handling::TaskOperationContext::for_task($operation, $task)
    };
}
