use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use jobqueue_core::{AppConfig, SchedulerError, Task, TaskConfig};
use jobqueue_infrastructure::DatabaseManager;
use jobqueue_worker::{Job, JobRegistry, Worker};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::jobs::builtin_jobs;

/// 主应用程序：数据库连接加上一个注册了内置任务的Worker
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    worker: Worker,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置校验失败")?;

        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
        let mut registry = JobRegistry::new();
        registry
            .register(builtin_jobs())
            .context("注册内置任务失败")?;
        let worker = Worker::with_registry(database.queue(), registry, config.worker.clone());

        Ok(Self {
            config,
            database,
            worker,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// 注册额外的任务
    pub async fn register(&self, jobs: Vec<Job>) -> Result<()> {
        self.worker.register(jobs).await.context("注册任务失败")
    }

    /// 创建任务表
    pub async fn migrate(&self) -> Result<()> {
        self.database.migrate().await.context("数据库迁移失败")
    }

    /// 调度任务，`delay` 为空时立即执行
    pub async fn schedule(
        &self,
        job_name: &str,
        args: Vec<u8>,
        delay: Option<Duration>,
    ) -> Result<Task> {
        let mut task_config = TaskConfig::new(job_name).with_args(args);
        if let Some(delay) = delay {
            let delta = TimeDelta::from_std(delay).context("延迟时间超出范围")?;
            task_config = task_config.scheduled_at(Utc::now() + delta);
        }

        let task = self
            .worker
            .schedule(task_config)
            .await
            .with_context(|| format!("调度任务失败: {job_name}"))?;
        info!("任务已调度: {} (id: {})", task, task.id);
        Ok(task)
    }

    /// 启动Worker直到收到关闭信号，然后在配置的超时内等待运行中的任务
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.database
            .health_check()
            .await
            .context("数据库健康检查失败")?;
        self.worker.start().await.context("启动Worker失败")?;
        let host = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(
            "Worker已在 {} 上启动，已注册任务: {}",
            host,
            self.worker.registered_jobs().await.join(", ")
        );

        let _ = shutdown_rx.recv().await;
        info!("收到关闭信号，开始优雅关闭...");

        match self.worker.stop(self.config.worker.shutdown_timeout()).await {
            Ok(()) => Ok(()),
            Err(SchedulerError::ShutdownTimeout) => {
                warn!(
                    "等待运行中的任务超时（{}秒）",
                    self.config.worker.shutdown_timeout_seconds
                );
                Ok(())
            }
            Err(e) => Err(e).context("停止Worker失败"),
        }
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}
