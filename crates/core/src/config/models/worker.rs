use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 单个Worker的运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 同时执行的处理函数上限，构造Worker时确定
    pub max_routines: usize,
    /// 每次轮询后的休眠时间
    pub polling_sleep_ms: u64,
    /// 等待空闲执行槽的最长时间，超过即视为Worker卡死
    pub global_timeout_seconds: u64,
    /// 停止时等待运行中任务的时间
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_routines: 5,
            polling_sleep_ms: 500,
            global_timeout_seconds: 15 * 60,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_routines == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.global_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("全局超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn polling_sleep(&self) -> Duration {
        Duration::from_millis(self.polling_sleep_ms)
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}
