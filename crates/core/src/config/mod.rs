//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML配置文件 → 环境变量（前缀 `JOBQUEUE`，
//! 层级分隔符 `__`，例如 `JOBQUEUE_DATABASE__URL`）。

pub mod models;

pub use models::{AppConfig, DatabaseConfig, ObservabilityConfig, WorkerConfig};
