use std::sync::Arc;

use jobqueue_core::{DatabaseConfig, Queue, SchedulerResult};
use tracing::info;

use super::postgres::{self, PostgresQueue};
use super::sqlite::{self, SqliteQueue};
use crate::timeout_handler::TimeoutUtils;

/// Database type detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// Database connection pool
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    /// Create pool from configuration with automatic type detection
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => Ok(DatabasePool::PostgreSQL(
                postgres::create_pool(config).await?,
            )),
            DatabaseType::SQLite => Ok(DatabasePool::SQLite(sqlite::create_pool(config).await?)),
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// Unified database manager
///
/// 负责连接、建表，并按数据库类型返回对应的队列实现。
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let pool = DatabasePool::new(config).await?;
        info!(
            "Connected to {:?} database ({} max connections)",
            pool.database_type(),
            config.max_connections
        );
        Ok(Self { pool })
    }

    /// 使用默认连接参数按URL连接
    pub async fn connect(url: &str) -> SchedulerResult<Self> {
        let config = DatabaseConfig {
            url: url.to_string(),
            ..Default::default()
        };
        Self::new(&config).await
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// 创建任务表和索引，可重复执行
    pub async fn migrate(&self) -> SchedulerResult<()> {
        TimeoutUtils::long_running(
            async {
                match &self.pool {
                    DatabasePool::PostgreSQL(pool) => postgres::run_migrations(pool).await,
                    DatabasePool::SQLite(pool) => sqlite::run_migrations(pool).await,
                }
            },
            "数据库迁移",
        )
        .await?;
        info!("Database schema is up to date");
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    /// Factory method for the task queue
    pub fn queue(&self) -> Arc<dyn Queue> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresQueue::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteQueue::new(pool.clone())),
        }
    }
}
