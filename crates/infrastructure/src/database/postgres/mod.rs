pub mod postgres_queue;

pub use postgres_queue::PostgresQueue;

use jobqueue_core::{DatabaseConfig, SchedulerResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

pub async fn create_pool(config: &DatabaseConfig) -> SchedulerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout())
        .idle_timeout(config.idle_timeout())
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// 创建任务表、唯一约束和调度时间索引
pub async fn run_migrations(pool: &PgPool) -> SchedulerResult<()> {
    debug!("Running PostgreSQL database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS worker_tasks (
            id UUID PRIMARY KEY,
            job VARCHAR(20) NOT NULL,
            args BYTEA NOT NULL,
            scheduled_to TIMESTAMPTZ NOT NULL,
            tries SMALLINT NOT NULL DEFAULT 0,
            running BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            CONSTRAINT worker_tasks_job_args_key UNIQUE (job, args)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_worker_tasks_scheduled_to ON worker_tasks (scheduled_to ASC)",
    )
    .execute(pool)
    .await?;

    debug!("Successfully completed PostgreSQL database migrations");
    Ok(())
}
