pub mod sqlite_queue;

pub use sqlite_queue::SqliteQueue;

use jobqueue_core::{DatabaseConfig, SchedulerResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

/// 内存数据库每个连接都是独立的库，只能使用单连接
fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// 根据配置创建SQLite连接池，文件不存在时自动创建
pub async fn create_pool(config: &DatabaseConfig) -> SchedulerResult<SqlitePool> {
    debug!("Creating SQLite pool at: {}", config.url);

    let mut connect_options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.connection_timeout());

    if is_in_memory(&config.url) {
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        pool_options = pool_options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(config.idle_timeout());
    }

    let pool = pool_options.connect_with(connect_options).await?;
    Ok(pool)
}

/// 创建任务表和索引
pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");

    // 时间戳以微秒整数存储，保证按数值排序
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS worker_tasks (
            id TEXT PRIMARY KEY,
            job TEXT NOT NULL CHECK (length(job) <= 20),
            args BLOB NOT NULL,
            scheduled_to INTEGER NOT NULL,
            tries INTEGER NOT NULL DEFAULT 0,
            running BOOLEAN NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (job, args)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_worker_tasks_scheduled_to ON worker_tasks(scheduled_to ASC)",
        "CREATE INDEX IF NOT EXISTS idx_worker_tasks_running ON worker_tasks(running)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
