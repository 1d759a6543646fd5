use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::Task;
use crate::SchedulerResult;

/// 任务队列存储接口
///
/// 所有方法都必须可以被多个并发的轮询者（同进程或跨进程）安全调用。
/// 同一条任务在任意时刻最多只能被一个 `poll` 领取。
#[async_trait]
pub trait Queue: Send + Sync {
    /// 插入新任务。相同 `(job_name, args)` 已存在时返回 `DuplicateTask`
    async fn enqueue(&self, task: &Task) -> SchedulerResult<()>;

    /// 原子地领取一条到期且未运行的任务，按 `scheduled_to` 升序。
    /// 没有可执行任务时返回 `Ok(None)`
    async fn poll(&self) -> SchedulerResult<Option<Task>>;

    /// 释放任务并安排到 `to` 重新执行，`tries` 加一
    async fn reschedule(&self, task: &Task, to: DateTime<Utc>) -> SchedulerResult<()>;

    /// 删除任务记录
    async fn dequeue(&self, task: &Task) -> SchedulerResult<()>;
}
