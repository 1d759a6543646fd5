use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobqueue_core::{Queue, SchedulerResult, Task};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    task_context,
    timeout_handler::TimeoutUtils,
};

/// 基于PostgreSQL的任务队列
///
/// 领取和重新调度都通过 `FOR UPDATE SKIP LOCKED` 锁定目标行，
/// 多个进程并发轮询时不会互相阻塞，也不会重复领取。
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
}

impl PostgresQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_task(row: &PgRow) -> SchedulerResult<Task> {
        let tries: i16 = row.try_get("tries")?;
        let tries = u16::try_from(tries).map_err(|e| {
            RepositoryErrorHelpers::task_mapping_error(task_context!(RepositoryOperation::Poll), e)
        })?;

        Ok(Task {
            id: row.try_get("id")?,
            job_name: row.try_get("job")?,
            args: row.try_get("args")?,
            scheduled_to: row.try_get("scheduled_to")?,
            tries,
            running: row.try_get("running")?,
        })
    }
}

#[async_trait]
impl Queue for PostgresQueue {
    #[instrument(skip(self, task), fields(task_id = %task.id, job_name = %task.job_name))]
    async fn enqueue(&self, task: &Task) -> SchedulerResult<()> {
        let context = task_context!(RepositoryOperation::Enqueue, task = task);
        let tries = i16::try_from(task.tries)
            .map_err(|e| RepositoryErrorHelpers::task_mapping_error(context.clone(), e))?;

        TimeoutUtils::database(
            async {
                sqlx::query(
                    r#"
                    INSERT INTO worker_tasks (id, job, args, scheduled_to, tries)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(task.id)
                .bind(&task.job_name)
                .bind(&task.args)
                .bind(task.scheduled_to)
                .bind(tries)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))
            },
            &format!("入队任务 '{}'", task.job_name),
        )
        .await?;

        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn poll(&self) -> SchedulerResult<Option<Task>> {
        let context = task_context!(RepositoryOperation::Poll);

        let row = TimeoutUtils::database(
            async {
                sqlx::query(
                    r#"
                    WITH task AS (
                        SELECT id FROM worker_tasks
                        WHERE running = false AND scheduled_to <= now()
                        ORDER BY scheduled_to ASC
                        LIMIT 1
                        FOR UPDATE SKIP LOCKED
                    )
                    UPDATE worker_tasks SET
                        running = true,
                        updated_at = now()
                    FROM task
                    WHERE worker_tasks.id = task.id
                    RETURNING worker_tasks.id, worker_tasks.job, worker_tasks.args,
                              worker_tasks.scheduled_to, worker_tasks.tries, worker_tasks.running
                    "#,
                )
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))
            },
            "领取到期任务",
        )
        .await?;

        match row {
            Some(row) => {
                let task = Self::row_to_task(&row)?;
                debug!("claimed task {} ({})", task, task.id);
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, job_name = %task.job_name, to = %to))]
    async fn reschedule(&self, task: &Task, to: DateTime<Utc>) -> SchedulerResult<()> {
        let context = task_context!(RepositoryOperation::Reschedule, task = task);

        TimeoutUtils::database(
            async {
                sqlx::query(
                    r#"
                    WITH task AS (
                        SELECT id FROM worker_tasks
                        WHERE id = $1
                        FOR UPDATE SKIP LOCKED
                    )
                    UPDATE worker_tasks SET
                        running = false,
                        tries = tries + 1,
                        scheduled_to = $2,
                        updated_at = now()
                    FROM task
                    WHERE worker_tasks.id = task.id
                    "#,
                )
                .bind(task.id)
                .bind(to)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))
            },
            &format!("重新调度任务 '{}'", task.job_name),
        )
        .await?;

        RepositoryErrorHelpers::log_operation_success(&context, Some(&format!("下次执行: {to}")));
        Ok(())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, job_name = %task.job_name))]
    async fn dequeue(&self, task: &Task) -> SchedulerResult<()> {
        let context = task_context!(RepositoryOperation::Dequeue, task = task);

        TimeoutUtils::database(
            async {
                sqlx::query("DELETE FROM worker_tasks WHERE id = $1")
                    .bind(task.id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))
            },
            &format!("删除任务 '{}'", task.job_name),
        )
        .await?;

        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(())
    }
}
