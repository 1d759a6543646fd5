//! 存储操作超时
//!
//! 队列的每条SQL都包在超时里，数据库卡死时轮询循环会拿到错误并继续，
//! 而不是永远挂起。

use jobqueue_core::{SchedulerError, SchedulerResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::error;

/// 单条队列语句的超时
pub const QUEUE_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// 建表迁移的超时
pub const MIGRATION_TIMEOUT: Duration = Duration::from_secs(300);

pub struct TimeoutUtils;

impl TimeoutUtils {
    /// 队列语句（入队、领取、重新调度、删除）
    pub async fn database<F, T>(operation: F, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        Self::with_timeout(operation, QUEUE_STATEMENT_TIMEOUT, operation_name).await
    }

    /// 建表迁移
    pub async fn long_running<F, T>(operation: F, operation_name: &str) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        Self::with_timeout(operation, MIGRATION_TIMEOUT, operation_name).await
    }

    pub async fn with_timeout<F, T>(
        operation: F,
        limit: Duration,
        operation_name: &str,
    ) -> SchedulerResult<T>
    where
        F: Future<Output = SchedulerResult<T>>,
    {
        timeout(limit, operation).await.unwrap_or_else(|_| {
            let message = format!("{operation_name} 在 {limit:?} 内未完成");
            error!("{}", message);
            Err(SchedulerError::Timeout(message))
        })
    }
}
