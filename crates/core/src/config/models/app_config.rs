use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig, observability::ObservabilityConfig, worker::WorkerConfig,
};

/// 默认配置文件查找路径
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/jobqueue.toml", "jobqueue.toml"];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: JOBQUEUE_, nesting: `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("database.url", defaults.database.url.as_str())?
            .set_default("database.max_connections", defaults.database.max_connections as i64)?
            .set_default("database.min_connections", defaults.database.min_connections as i64)?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds as i64,
            )?
            .set_default(
                "database.idle_timeout_seconds",
                defaults.database.idle_timeout_seconds as i64,
            )?
            .set_default("worker.max_routines", defaults.worker.max_routines as i64)?
            .set_default("worker.polling_sleep_ms", defaults.worker.polling_sleep_ms as i64)?
            .set_default(
                "worker.global_timeout_seconds",
                defaults.worker.global_timeout_seconds as i64,
            )?
            .set_default(
                "worker.shutdown_timeout_seconds",
                defaults.worker.shutdown_timeout_seconds as i64,
            )?
            .set_default("observability.log_level", defaults.observability.log_level.as_str())?
            .set_default(
                "observability.log_format",
                defaults.observability.log_format.as_str(),
            )?
            .set_default(
                "observability.metrics_enabled",
                defaults.observability.metrics_enabled,
            )?
            .set_default(
                "observability.metrics_bind_address",
                defaults.observability.metrics_bind_address.as_str(),
            )?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        // 环境变量优先级最高
        builder = builder.add_source(
            Environment::with_prefix("JOBQUEUE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_toml_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/jobs"

            [worker]
            max_routines = 2
            polling_sleep_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url, "postgres://localhost/jobs");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.worker.max_routines, 2);
        assert_eq!(config.worker.polling_sleep_ms, 50);
        assert_eq!(config.worker.global_timeout_seconds, 900);
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        let result = AppConfig::from_toml(
            r#"
            [worker]
            max_routines = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.worker.max_routines, config.worker.max_routines);
        assert_eq!(parsed.database.url, config.database.url);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"sqlite::memory:\"\n\n[worker]\nshutdown_timeout_seconds = 5"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.worker.shutdown_timeout_seconds, 5);
        assert_eq!(config.worker.max_routines, 5);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/jobqueue.toml")).is_err());
    }

    #[test]
    fn test_environment_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[observability]\nlog_level = \"info\"").unwrap();

        std::env::set_var("JOBQUEUE_OBSERVABILITY__METRICS_BIND_ADDRESS", "127.0.0.1:9999");
        let config = AppConfig::load(Some(file.path().to_str().unwrap()));
        std::env::remove_var("JOBQUEUE_OBSERVABILITY__METRICS_BIND_ADDRESS");

        let config = config.unwrap();
        assert_eq!(config.observability.metrics_bind_address, "127.0.0.1:9999");
    }
}
