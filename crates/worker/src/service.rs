use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use jobqueue_core::{Queue, SchedulerError, SchedulerResult, Task, TaskConfig, WorkerConfig};
use serde::Serialize;
use tokio::sync::{broadcast, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::args::encode_args;
use crate::job::{Job, JobContext};
use crate::registry::{JobRegistry, RegisteredJob};
use crate::worker_metrics;

/// 任务调度器
///
/// 轮询队列，把到期任务交给最多 `max_routines` 个并发执行的tokio任务，
/// 并根据结果删除、重新调度或放弃任务。克隆得到的是同一个Worker的句柄。
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    queue: Arc<dyn Queue>,
    registry: RwLock<JobRegistry>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    /// 最近一次开始执行的任务，用于超时诊断
    last_task: Mutex<Option<Task>>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
}

/// 轮询循环退出时（包括panic展开）清除运行标记
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Worker {
    pub fn new(queue: Arc<dyn Queue>, config: WorkerConfig) -> Self {
        Self::with_registry(queue, JobRegistry::new(), config)
    }

    /// 使用调用方预先填充的任务表创建Worker
    pub fn with_registry(queue: Arc<dyn Queue>, registry: JobRegistry, config: WorkerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let max_routines = config.max_routines.max(1);

        Self {
            inner: Arc::new(WorkerInner {
                queue,
                registry: RwLock::new(registry),
                semaphore: Arc::new(Semaphore::new(max_routines)),
                config: WorkerConfig {
                    max_routines,
                    ..config
                },
                last_task: Mutex::new(None),
                shutdown_tx,
                loop_handle: tokio::sync::Mutex::new(None),
                is_running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> Arc<dyn Queue> {
        Arc::clone(&self.inner.queue)
    }

    /// 轮询循环是否在运行；循环panic后变为 `false`
    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    /// 当前空闲的执行槽数量
    pub fn available_routines(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// 注册一批任务，任一任务不合法时整批不生效
    pub async fn register(&self, jobs: impl IntoIterator<Item = Job>) -> SchedulerResult<()> {
        let jobs: Vec<Job> = jobs.into_iter().collect();
        let names: Vec<String> = jobs.iter().map(|job| job.name().to_string()).collect();

        self.inner.registry.write().await.register(jobs)?;
        info!("registered jobs: {}", names.join(", "));
        Ok(())
    }

    pub async fn registered_jobs(&self) -> Vec<String> {
        self.inner.registry.read().await.names()
    }

    /// 调度一个任务；任务名必须已注册，`scheduled_to` 为空时立即执行
    pub async fn schedule(&self, config: TaskConfig) -> SchedulerResult<Task> {
        if !self.inner.registry.read().await.contains(&config.job_name) {
            return Err(SchedulerError::JobNotRegistered {
                job_name: config.job_name,
            });
        }

        let task = Task::new(config);
        self.inner.queue.enqueue(&task).await?;
        debug!("scheduled task: {}", task);
        Ok(task)
    }

    /// 把参数序列化为JSON后调度
    pub async fn schedule_json<T: Serialize + ?Sized>(
        &self,
        job_name: &str,
        args: &T,
        scheduled_to: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Task> {
        self.schedule(TaskConfig {
            job_name: job_name.to_string(),
            args: encode_args(args)?,
            scheduled_to,
        })
        .await
    }

    /// 在后台启动轮询循环
    pub async fn start(&self) -> SchedulerResult<()> {
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::Internal("Worker already running".to_string()));
        }

        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.run_loop(shutdown_rx).await });
        *self.inner.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    /// 在当前任务中运行轮询循环，直到 `stop` 被调用
    pub async fn run(&self) -> SchedulerResult<()> {
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::Internal("Worker already running".to_string()));
        }

        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        self.run_loop(shutdown_rx).await;
        Ok(())
    }

    async fn run_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let _running = RunningGuard(&self.inner.is_running);
        info!(
            "worker started (max_routines: {}, polling every {:?})",
            self.inner.config.max_routines,
            self.inner.config.polling_sleep()
        );

        loop {
            if let Err(e) = self.poll_once().await {
                worker_metrics::poll_failed();
                error!("failed to poll task: {}", e);
            }

            tokio::select! {
                _ = sleep(self.inner.config.polling_sleep()) => {}
                _ = shutdown_rx.recv() => {
                    debug!("polling loop received shutdown signal");
                    break;
                }
            }
        }
    }

    /// 轮询一次；领取到任务时等待空闲执行槽并在后台执行。
    /// 返回是否派发了任务。
    ///
    /// # Panics
    ///
    /// 领取到的任务对应的job未注册时panic；等待执行槽超过 `global_timeout`
    /// 时panic，消息中包含最近开始执行的任务。两者都发生在调度路径上，
    /// 由 `start` 启动时可以通过 `stop` 观察到。
    pub async fn poll_once(&self) -> SchedulerResult<bool> {
        let Some(task) = self.inner.queue.poll().await? else {
            return Ok(false);
        };
        worker_metrics::task_claimed(&task.job_name);
        let job = self.lookup(&task).await;

        let permit = self.acquire_routine().await?;

        if let Ok(mut last) = self.inner.last_task.lock() {
            *last = Some(task.clone());
        }

        let worker = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            worker_metrics::handler_started();
            worker.execute(task, job).await;
            worker_metrics::handler_finished();
        });
        Ok(true)
    }

    async fn acquire_routine(&self) -> SchedulerResult<OwnedSemaphorePermit> {
        let global_timeout = self.inner.config.global_timeout();

        match timeout(global_timeout, Arc::clone(&self.inner.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(SchedulerError::Internal("worker semaphore closed".to_string())),
            Err(_) => {
                let last = self
                    .inner
                    .last_task
                    .lock()
                    .ok()
                    .and_then(|last| last.as_ref().map(ToString::to_string))
                    .unwrap_or_else(|| "none".to_string());
                panic!("worker timeout, last running task: {last}");
            }
        }
    }

    /// 执行一个已领取的任务并处理结果
    ///
    /// # Panics
    ///
    /// 任务对应的job未注册时panic（注册表与已持久化任务不一致）。
    pub async fn handle(&self, task: Task) {
        let job = self.lookup(&task).await;
        self.execute(task, job).await;
    }

    async fn lookup(&self, task: &Task) -> Arc<RegisteredJob> {
        let job = self.inner.registry.read().await.get(&task.job_name);
        match job {
            Some(job) => job,
            None => panic!("the job '{}' isn't registered", task.job_name),
        }
    }

    async fn execute(&self, task: Task, job: Arc<RegisteredJob>) {
        info!("running task: {}", task);
        let result = (job.handler)(JobContext::from(&task), task.args.clone()).await;

        match result {
            Ok(()) => {
                info!("task completed: {}", task);
                worker_metrics::task_completed(&task.job_name);
                self.finish(&task, &job, true).await;
            }
            Err(e) if task.tries < job.retries => {
                let delay = job.backoff.next_delay(task.tries);
                let to = retry_at(Utc::now(), delay);
                warn!(
                    "task failed: {} (try {}/{}), retrying in {:?}: {:#}",
                    task,
                    u32::from(task.tries) + 1,
                    u32::from(job.retries) + 1,
                    delay,
                    e
                );
                worker_metrics::task_rescheduled(&task.job_name);
                if let Err(e) = self.inner.queue.reschedule(&task, to).await {
                    error!("failed to reschedule task {}: {}", task, e);
                }
            }
            Err(e) => {
                error!(
                    "task failed permanently after {} tries: {}: {:#}",
                    u32::from(task.tries) + 1,
                    task,
                    e
                );
                worker_metrics::task_discarded(&task.job_name);
                self.finish(&task, &job, false).await;
            }
        }
    }

    /// 删除任务后执行回调；删除失败时回调仍然执行
    async fn finish(&self, task: &Task, job: &RegisteredJob, succeeded: bool) {
        if let Err(e) = self.inner.queue.dequeue(task).await {
            error!("failed to dequeue task {}: {}", task, e);
        }

        let callback = if succeeded {
            job.on_success.as_ref()
        } else {
            job.on_failure.as_ref()
        };
        if let Some(callback) = callback {
            callback().await;
        }
    }

    /// 停止轮询并等待运行中的任务结束
    ///
    /// 超时返回 `ShutdownTimeout`，运行中的处理函数不会被中止。
    ///
    /// # Panics
    ///
    /// 轮询循环因panic退出时，在这里重新抛出同一个panic。
    pub async fn stop(&self, stop_timeout: Duration) -> SchedulerResult<()> {
        info!("stopping");
        let _ = self.inner.shutdown_tx.send(());

        let handle = self.inner.loop_handle.lock().await.take();
        let max_routines = u32::try_from(self.inner.config.max_routines).unwrap_or(u32::MAX);

        let drain = async {
            if let Some(handle) = handle {
                match handle.await {
                    Ok(()) => {}
                    Err(e) if e.is_panic() => {
                        error!("polling loop panicked");
                        std::panic::resume_unwind(e.into_panic());
                    }
                    Err(e) => error!("polling loop terminated abnormally: {}", e),
                }
            }

            info!("waiting for running tasks");
            // 拿到全部执行槽即表示没有处理函数在运行
            let _all = self.inner.semaphore.acquire_many(max_routines).await;
        };

        match timeout(stop_timeout, drain).await {
            Ok(()) => {
                info!("stopped");
                Ok(())
            }
            Err(_) => {
                warn!("timeout waiting for running tasks, stopping anyway");
                Err(SchedulerError::ShutdownTimeout)
            }
        }
    }
}

fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    i64::try_from(delay.as_secs())
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
