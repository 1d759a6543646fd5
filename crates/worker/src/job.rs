use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use jobqueue_core::Task;
use uuid::Uuid;

/// 任务处理函数：接收执行上下文和原始参数字节
pub type JobHandler =
    Arc<dyn Fn(JobContext, Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 任务结束后的回调，不带参数
pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 处理函数可见的执行信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub task_id: Uuid,
    pub job_name: String,
    /// 本次执行之前已经失败的次数
    pub tries: u16,
    pub scheduled_to: DateTime<Utc>,
}

impl From<&Task> for JobContext {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            job_name: task.job_name.clone(),
            tries: task.tries,
            scheduled_to: task.scheduled_to,
        }
    }
}

/// 任务定义：处理函数加重试策略
///
/// ```
/// use std::time::Duration;
/// use jobqueue_worker::Job;
///
/// let job = Job::new("send-push")
///     .with_handler(|_ctx, args| async move {
///         anyhow::ensure!(!args.is_empty(), "empty payload");
///         Ok(())
///     })
///     .with_retries(6)
///     .with_delay(Duration::from_secs(500))
///     .with_max_delay(Duration::from_secs(1000));
/// assert_eq!(job.name(), "send-push");
/// ```
#[derive(Clone)]
pub struct Job {
    pub(crate) name: String,
    pub(crate) handler: Option<JobHandler>,
    pub(crate) on_success: Option<JobCallback>,
    pub(crate) on_failure: Option<JobCallback>,
    pub(crate) retries: u16,
    pub(crate) delay: Duration,
    /// `None` 时等于 `delay`
    pub(crate) max_delay: Option<Duration>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: None,
            on_success: None,
            on_failure: None,
            retries: 0,
            delay: Duration::ZERO,
            max_delay: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retries(&self) -> u16 {
        self.retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay.unwrap_or(self.delay)
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(JobContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler = Some(Arc::new(
            move |ctx: JobContext, args: Vec<u8>| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(handler(ctx, args))
            },
        ));
        self
    }

    pub fn on_success<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_success = Some(into_callback(callback));
        self
    }

    pub fn on_failure<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_failure = Some(into_callback(callback));
        self
    }

    /// 最大重试次数，0表示只执行一次
    pub fn with_retries(mut self, retries: u16) -> Self {
        self.retries = retries;
        self
    }

    /// 第一次重试前的等待时间
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 最后一次重试前的等待时间，`Duration::ZERO` 表示与 `delay` 相同
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = (!max_delay.is_zero()).then_some(max_delay);
        self
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("has_handler", &self.handler.is_some())
            .field("retries", &self.retries)
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

fn into_callback<F, Fut>(callback: F) -> JobCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(callback()) })
}
