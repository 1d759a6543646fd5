//! 日志初始化
//!
//! `RUST_LOG` 存在时覆盖配置中的日志级别。

use anyhow::{Context, Result};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Output format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(anyhow::anyhow!("不支持的日志格式: {other}")),
        }
    }
}

/// 按级别和格式初始化全局tracing订阅者，只能调用一次
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let format: LogFormat = log_format.parse()?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}

/// 使用配置文件中的可观测性配置初始化日志
pub fn init_from_config(config: &ObservabilityConfig) -> Result<()> {
    init_logging(&config.log_level, &config.log_format)
}
