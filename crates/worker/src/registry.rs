use std::collections::HashMap;
use std::sync::Arc;

use jobqueue_core::{SchedulerError, SchedulerResult, MAX_JOB_NAME_LEN, MAX_RETRIES};

use crate::backoff::BackoffCurve;
use crate::job::{Job, JobCallback, JobHandler};

/// 通过校验、已计算好重试曲线的任务
pub struct RegisteredJob {
    pub name: String,
    pub handler: JobHandler,
    pub on_success: Option<JobCallback>,
    pub on_failure: Option<JobCallback>,
    pub retries: u16,
    pub backoff: BackoffCurve,
}

impl RegisteredJob {
    fn try_from_job(job: Job) -> SchedulerResult<Self> {
        if job.name.chars().count() > MAX_JOB_NAME_LEN {
            return Err(SchedulerError::JobNameTooLong {
                job_name: job.name,
                max: MAX_JOB_NAME_LEN,
            });
        }

        if job.name.is_empty() {
            return Err(SchedulerError::InvalidJob {
                job_name: job.name,
                message: "任务名称不能为空".to_string(),
            });
        }

        if job.retries > MAX_RETRIES {
            return Err(SchedulerError::InvalidJob {
                message: format!("重试次数 {} 超过上限 {}", job.retries, MAX_RETRIES),
                job_name: job.name,
            });
        }

        let max_delay = job.max_delay();
        let Some(handler) = job.handler else {
            return Err(SchedulerError::MissingHandler { job_name: job.name });
        };

        if max_delay < job.delay {
            return Err(SchedulerError::InvalidJob {
                message: format!(
                    "最大重试间隔 {:?} 小于重试间隔 {:?}",
                    max_delay, job.delay
                ),
                job_name: job.name,
            });
        }

        Ok(Self {
            backoff: BackoffCurve::new(job.retries, job.delay, max_delay),
            name: job.name,
            handler,
            on_success: job.on_success,
            on_failure: job.on_failure,
            retries: job.retries,
        })
    }
}

/// 单个Worker拥有的任务表
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<RegisteredJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 先校验整批任务，全部合法后再写入；同名任务以最后一个为准
    pub fn register(&mut self, jobs: impl IntoIterator<Item = Job>) -> SchedulerResult<()> {
        let validated = jobs
            .into_iter()
            .map(RegisteredJob::try_from_job)
            .collect::<SchedulerResult<Vec<_>>>()?;

        for job in validated {
            self.jobs.insert(job.name.clone(), Arc::new(job));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredJob>> {
        self.jobs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }
}
