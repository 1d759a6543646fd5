use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres://` / `postgresql://` 使用PostgreSQL，`sqlite:` 使用SQLite
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://jobqueue.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        let supported = ["postgresql://", "postgres://", "sqlite:"];
        if !supported.iter().any(|prefix| self.url.starts_with(prefix)) {
            return Err(anyhow::anyhow!(
                "不支持的数据库URL: {}，必须是PostgreSQL或SQLite格式",
                self.url
            ));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}
