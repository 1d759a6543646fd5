use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobqueue_core::{Queue, SchedulerError, SchedulerResult, Task};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// 内存任务队列实现
///
/// 适用于测试和嵌入式场景，进程退出后数据丢失。
/// 领取在锁内完成比较并交换，和数据库实现一样保证不会重复领取。
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前队列中的任务数量（包括运行中的任务）
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// 按ID获取任务的快照
    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().await.get(&id).cloned()
    }

    /// 所有任务的快照，按 `scheduled_to` 升序
    pub async fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().await.values().cloned().collect();
        tasks.sort_by_key(|task| task.scheduled_to);
        tasks
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.lock().await;

        let duplicate = tasks
            .values()
            .any(|existing| existing.job_name == task.job_name && existing.args == task.args);
        if duplicate || tasks.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask {
                job_name: task.job_name.clone(),
            });
        }

        let mut stored = task.clone();
        stored.running = false;
        tasks.insert(stored.id, stored);
        debug!("enqueued task {} ({})", task, task.id);
        Ok(())
    }

    async fn poll(&self) -> SchedulerResult<Option<Task>> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock().await;

        let next = tasks
            .values_mut()
            .filter(|task| task.is_due(now))
            .min_by_key(|task| task.scheduled_to);

        Ok(next.map(|task| {
            task.running = true;
            task.clone()
        }))
    }

    async fn reschedule(&self, task: &Task, to: DateTime<Utc>) -> SchedulerResult<()> {
        if let Some(stored) = self.tasks.lock().await.get_mut(&task.id) {
            stored.running = false;
            stored.tries = stored.tries.saturating_add(1);
            stored.scheduled_to = to;
        }
        Ok(())
    }

    async fn dequeue(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks.lock().await.remove(&task.id);
        Ok(())
    }
}
