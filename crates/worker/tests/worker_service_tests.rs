use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobqueue_core::{
    Queue, SchedulerError, SchedulerResult, Task, TaskConfig, WorkerConfig,
};
use jobqueue_infrastructure::InMemoryQueue;
use jobqueue_worker::{decode_args, Job, JobRegistry, Worker};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};

fn test_config(max_routines: usize) -> WorkerConfig {
    WorkerConfig {
        max_routines,
        polling_sleep_ms: 10,
        global_timeout_seconds: 60,
        shutdown_timeout_seconds: 5,
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

async fn wait_until(condition: impl Fn() -> bool, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// 统计执行次数和回调次数的任务
fn counting_job(
    name: &str,
    fail: bool,
    runs: &Arc<AtomicUsize>,
    successes: &Arc<AtomicUsize>,
    failures: &Arc<AtomicUsize>,
) -> Job {
    let runs = runs.clone();
    let successes = successes.clone();
    let failures = failures.clone();

    Job::new(name)
        .with_handler(move |_ctx, _args| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(anyhow::anyhow!("handler failed"))
                } else {
                    Ok(())
                }
            }
        })
        .on_success(move || {
            let successes = successes.clone();
            async move {
                successes.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_failure(move || {
            let failures = failures.clone();
            async move {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        })
}

fn noop_job(name: &str) -> Job {
    Job::new(name).with_handler(|_ctx, _args| async { Ok(()) })
}

#[tokio::test]
async fn test_schedule_requires_registered_job() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));

    let err = worker
        .schedule(TaskConfig::new("unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotRegistered { ref job_name } if job_name == "unknown"));
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_schedule_defaults_to_now() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));
    worker.register(vec![noop_job("example")]).await.unwrap();

    let before = Utc::now();
    let task = worker
        .schedule(TaskConfig::new("example").with_args(b"1".to_vec()))
        .await
        .unwrap();
    assert!(task.scheduled_to >= before && task.scheduled_to <= Utc::now());
    assert_eq!(queue.len().await, 1);

    let err = worker
        .schedule(TaskConfig::new("example").with_args(b"1".to_vec()))
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    worker
        .schedule(TaskConfig::new("example").with_args(b"2".to_vec()))
        .await
        .unwrap();
    assert_eq!(queue.len().await, 2);
}

#[tokio::test]
async fn test_register_rejects_invalid_batch() {
    let worker = Worker::new(Arc::new(InMemoryQueue::new()), test_config(1));

    let err = worker
        .register(vec![noop_job("ok"), noop_job("a-name-that-is-way-too-long")])
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::JobNameTooLong { .. }));
    assert!(worker.registered_jobs().await.is_empty());

    let err = worker.register(vec![Job::new("nohandler")]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::MissingHandler { .. }));
}

#[tokio::test]
async fn test_success_deletes_and_calls_on_success() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));
    let (runs, successes, failures) = (counter(), counter(), counter());
    worker
        .register(vec![counting_job("ok", false, &runs, &successes, &failures).with_retries(5)])
        .await
        .unwrap();

    // 之前已经失败过的任务成功后同样只删除一次
    let mut task = Task::new(TaskConfig::new("ok"));
    task.tries = 3;
    queue.enqueue(&task).await.unwrap();
    let claimed = queue.poll().await.unwrap().unwrap();
    assert_eq!(claimed.tries, 3);

    worker.handle(claimed).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_failure_with_retries_left_reschedules() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));
    let (runs, successes, failures) = (counter(), counter(), counter());
    worker
        .register(vec![counting_job("flaky", true, &runs, &successes, &failures)
            .with_retries(2)
            .with_delay(Duration::from_secs(30))])
        .await
        .unwrap();

    let task = worker.schedule(TaskConfig::new("flaky")).await.unwrap();
    let claimed = queue.poll().await.unwrap().unwrap();

    let before = Utc::now();
    worker.handle(claimed).await;
    let after = Utc::now();

    let stored = queue.get(task.id).await.unwrap();
    assert_eq!(stored.tries, 1);
    assert!(!stored.running);
    assert!(stored.scheduled_to >= before + chrono::Duration::seconds(30));
    assert!(stored.scheduled_to <= after + chrono::Duration::seconds(30));
    assert_eq!(successes.load(Ordering::SeqCst), 0);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failure_on_last_try_discards() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));
    let (runs, successes, failures) = (counter(), counter(), counter());
    worker
        .register(vec![counting_job("flaky", true, &runs, &successes, &failures).with_retries(2)])
        .await
        .unwrap();

    let mut task = Task::new(TaskConfig::new("flaky"));
    task.tries = 2;
    queue.enqueue(&task).await.unwrap();
    let claimed = queue.poll().await.unwrap().unwrap();

    worker.handle(claimed).await;

    assert!(queue.is_empty().await);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(successes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retry_exhaustion_runs_one_plus_retries_times() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(2));
    let (runs, successes, failures) = (counter(), counter(), counter());
    worker
        .register(vec![counting_job("always-fails", true, &runs, &successes, &failures)
            .with_retries(3)])
        .await
        .unwrap();

    worker
        .schedule(TaskConfig::new("always-fails"))
        .await
        .unwrap();
    worker.start().await.unwrap();

    let done = {
        let failures = failures.clone();
        wait_until(move || failures.load(Ordering::SeqCst) == 1, Duration::from_secs(5)).await
    };
    assert!(done, "on_failure was never called");

    worker.stop(Duration::from_secs(5)).await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(successes.load(Ordering::SeqCst), 0);
    assert!(queue.is_empty().await);
}

#[tokio::test]
#[should_panic(expected = "the job 'ghost' isn't registered")]
async fn test_unknown_job_panics() {
    let worker = Worker::new(Arc::new(InMemoryQueue::new()), test_config(1));
    worker.handle(Task::new(TaskConfig::new("ghost"))).await;
}

#[tokio::test]
async fn test_bounded_concurrency() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(2));
    let started = counter();
    let gate = Arc::new(Semaphore::new(0));

    let job = {
        let started = started.clone();
        let gate = gate.clone();
        Job::new("blocking").with_handler(move |_ctx, _args| {
            let started = started.clone();
            let gate = gate.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                let _permit = gate.acquire().await?;
                Ok(())
            }
        })
    };
    worker.register(vec![job]).await.unwrap();

    for i in 0..3u8 {
        worker
            .schedule(TaskConfig::new("blocking").with_args(vec![i]))
            .await
            .unwrap();
    }
    worker.start().await.unwrap();

    let two_started = {
        let started = started.clone();
        wait_until(move || started.load(Ordering::SeqCst) == 2, Duration::from_secs(5)).await
    };
    assert!(two_started);

    // 第三个任务必须等待空闲执行槽
    sleep(Duration::from_millis(200)).await;
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(worker.available_routines(), 0);

    gate.add_permits(3);
    let all_started = {
        let started = started.clone();
        wait_until(move || started.load(Ordering::SeqCst) == 3, Duration::from_secs(5)).await
    };
    assert!(all_started);

    worker.stop(Duration::from_secs(5)).await.unwrap();
    assert!(queue.is_empty().await);
}

#[tokio::test]
#[should_panic(expected = "worker timeout, last running task: stuck at")]
async fn test_global_timeout_panics_with_last_task() {
    let queue = Arc::new(InMemoryQueue::new());
    let config = WorkerConfig {
        global_timeout_seconds: 1,
        ..test_config(1)
    };
    let worker = Worker::new(queue, config);
    worker
        .register(vec![Job::new("stuck").with_handler(|_ctx, _args| async {
            futures::future::pending::<()>().await;
            Ok(())
        })])
        .await
        .unwrap();

    for i in 0..2u8 {
        worker
            .schedule(TaskConfig::new("stuck").with_args(vec![i]))
            .await
            .unwrap();
    }

    assert!(worker.poll_once().await.unwrap());
    // 唯一的执行槽被占用，第二次派发超过 global_timeout
    let _ = worker.poll_once().await;
}

#[tokio::test]
async fn test_stop_times_out_without_aborting_handlers() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let job = {
        let started = started.clone();
        let finished = finished.clone();
        Job::new("slow").with_handler(move |_ctx, _args| {
            let started = started.clone();
            let finished = finished.clone();
            async move {
                started.store(true, Ordering::SeqCst);
                sleep(Duration::from_millis(500)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    worker.register(vec![job]).await.unwrap();
    worker.schedule(TaskConfig::new("slow")).await.unwrap();
    worker.start().await.unwrap();

    let running = {
        let started = started.clone();
        wait_until(move || started.load(Ordering::SeqCst), Duration::from_secs(5)).await
    };
    assert!(running);

    let err = worker.stop(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ShutdownTimeout));
    assert!(!finished.load(Ordering::SeqCst));

    sleep(Duration::from_millis(800)).await;
    assert!(finished.load(Ordering::SeqCst), "handler should keep running after stop");
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_stop_drains_running_tasks() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(3));
    let finished = counter();

    let job = {
        let finished = finished.clone();
        Job::new("short").with_handler(move |_ctx, _args| {
            let finished = finished.clone();
            async move {
                sleep(Duration::from_millis(100)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    worker.register(vec![job]).await.unwrap();
    worker.schedule(TaskConfig::new("short")).await.unwrap();
    worker.start().await.unwrap();

    let claimed = {
        let queue = queue.clone();
        let mut claimed = false;
        for _ in 0..500 {
            if queue.snapshot().await.iter().all(|t| t.running) {
                claimed = true;
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        claimed
    };
    assert!(claimed);

    worker.stop(Duration::from_secs(5)).await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(worker.available_routines(), 3);
}

#[tokio::test]
async fn test_start_twice_fails() {
    let worker = Worker::new(Arc::new(InMemoryQueue::new()), test_config(1));
    worker.start().await.unwrap();
    assert!(worker.start().await.is_err());
    worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Greeting {
    name: String,
    times: u32,
}

#[tokio::test]
async fn test_schedule_json_round_trip() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));
    let received: Arc<Mutex<Option<Greeting>>> = Arc::new(Mutex::new(None));

    let job = {
        let received = received.clone();
        Job::new("greet").with_handler(move |_ctx, args| {
            let received = received.clone();
            async move {
                let greeting: Greeting = decode_args(&args)?;
                *received.lock().unwrap() = Some(greeting);
                Ok(())
            }
        })
    };
    worker.register(vec![job]).await.unwrap();

    let greeting = Greeting {
        name: "lisbon".to_string(),
        times: 2,
    };
    worker.schedule_json("greet", &greeting, None).await.unwrap();

    let claimed = queue.poll().await.unwrap().unwrap();
    worker.handle(claimed).await;

    assert_eq!(received.lock().unwrap().clone(), Some(greeting));
}

/// 删除总是失败的队列
struct FailingDequeueQueue {
    inner: InMemoryQueue,
}

#[async_trait]
impl Queue for FailingDequeueQueue {
    async fn enqueue(&self, task: &Task) -> SchedulerResult<()> {
        self.inner.enqueue(task).await
    }

    async fn poll(&self) -> SchedulerResult<Option<Task>> {
        self.inner.poll().await
    }

    async fn reschedule(&self, task: &Task, to: DateTime<Utc>) -> SchedulerResult<()> {
        self.inner.reschedule(task, to).await
    }

    async fn dequeue(&self, _task: &Task) -> SchedulerResult<()> {
        Err(SchedulerError::DatabaseOperation("connection reset".to_string()))
    }
}

#[tokio::test]
async fn test_callbacks_run_after_failed_dequeue() {
    let queue = Arc::new(FailingDequeueQueue {
        inner: InMemoryQueue::new(),
    });
    let worker = Worker::new(queue.clone(), test_config(1));
    let (runs, successes, failures) = (counter(), counter(), counter());
    worker
        .register(vec![
            counting_job("ok", false, &runs, &successes, &failures),
            counting_job("bad", true, &runs, &successes, &failures),
        ])
        .await
        .unwrap();

    worker.schedule(TaskConfig::new("ok")).await.unwrap();
    let claimed = queue.poll().await.unwrap().unwrap();
    worker.handle(claimed).await;
    assert_eq!(successes.load(Ordering::SeqCst), 1);

    worker.schedule(TaskConfig::new("bad")).await.unwrap();
    let claimed = queue.poll().await.unwrap().unwrap();
    worker.handle(claimed).await;
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

/// 前几次轮询失败的队列
struct FlakyPollQueue {
    inner: InMemoryQueue,
    failures_left: AtomicUsize,
}

#[async_trait]
impl Queue for FlakyPollQueue {
    async fn enqueue(&self, task: &Task) -> SchedulerResult<()> {
        self.inner.enqueue(task).await
    }

    async fn poll(&self) -> SchedulerResult<Option<Task>> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SchedulerError::DatabaseOperation("database unavailable".to_string()));
        }
        self.inner.poll().await
    }

    async fn reschedule(&self, task: &Task, to: DateTime<Utc>) -> SchedulerResult<()> {
        self.inner.reschedule(task, to).await
    }

    async fn dequeue(&self, task: &Task) -> SchedulerResult<()> {
        self.inner.dequeue(task).await
    }
}

#[tokio::test]
async fn test_poll_errors_do_not_stop_the_loop() {
    let queue = Arc::new(FlakyPollQueue {
        inner: InMemoryQueue::new(),
        failures_left: AtomicUsize::new(3),
    });
    let worker = Worker::new(queue.clone(), test_config(1));
    let (runs, successes, failures) = (counter(), counter(), counter());
    worker
        .register(vec![counting_job("ok", false, &runs, &successes, &failures)])
        .await
        .unwrap();
    worker.schedule(TaskConfig::new("ok")).await.unwrap();

    assert!(worker.poll_once().await.is_err());

    worker.start().await.unwrap();
    let done = {
        let successes = successes.clone();
        wait_until(move || successes.load(Ordering::SeqCst) == 1, Duration::from_secs(5)).await
    };
    worker.stop(Duration::from_secs(5)).await.unwrap();

    assert!(done);
    assert!(queue.inner.is_empty().await);
}

fn stuck_job() -> Job {
    Job::new("stuck").with_handler(|_ctx, _args| async {
        futures::future::pending::<()>().await;
        Ok(())
    })
}

#[tokio::test]
#[should_panic(expected = "the job 'ghost' isn't registered")]
async fn test_unknown_job_kills_loop_and_stop_rethrows() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue.clone(), test_config(1));
    queue.enqueue(&Task::new(TaskConfig::new("ghost"))).await.unwrap();

    worker.start().await.unwrap();
    let exited = {
        let worker = worker.clone();
        wait_until(move || !worker.is_running(), Duration::from_secs(5)).await
    };
    assert!(exited, "polling loop should exit on an unregistered job");
    // 在派发路径上panic，没有占用执行槽
    assert_eq!(worker.available_routines(), 1);

    let _ = worker.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
#[should_panic(expected = "worker timeout, last running task: stuck at")]
async fn test_global_timeout_kills_loop_and_stop_rethrows() {
    let queue = Arc::new(InMemoryQueue::new());
    let config = WorkerConfig {
        global_timeout_seconds: 1,
        ..test_config(1)
    };
    let worker = Worker::new(queue, config);
    worker.register(vec![stuck_job()]).await.unwrap();
    for i in 0..2u8 {
        worker
            .schedule(TaskConfig::new("stuck").with_args(vec![i]))
            .await
            .unwrap();
    }

    worker.start().await.unwrap();
    let exited = {
        let worker = worker.clone();
        wait_until(move || !worker.is_running(), Duration::from_secs(5)).await
    };
    assert!(exited, "polling loop should exit after global timeout");

    let _ = worker.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_with_registry_uses_given_jobs() {
    let queue = Arc::new(InMemoryQueue::new());
    let mut registry = JobRegistry::new();
    registry.register(vec![noop_job("prebuilt")]).unwrap();

    let worker = Worker::with_registry(queue.clone(), registry, test_config(1));
    assert_eq!(worker.registered_jobs().await, vec!["prebuilt".to_string()]);

    worker.schedule(TaskConfig::new("prebuilt")).await.unwrap();
    assert_eq!(queue.len().await, 1);

    let other = Worker::new(queue, test_config(1));
    assert!(other.registered_jobs().await.is_empty());
}
