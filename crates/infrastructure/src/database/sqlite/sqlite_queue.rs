use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobqueue_core::{Queue, SchedulerResult, Task};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    task_context,
    timeout_handler::TimeoutUtils,
};

/// 基于SQLite的任务队列
///
/// SQLite没有 `SKIP LOCKED`，领取任务使用单条语句的比较并交换：
/// 写操作在库级别串行执行，`AND running = 0` 保证一行只会被一条语句领取。
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let context = task_context!(RepositoryOperation::Poll);

        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| RepositoryErrorHelpers::task_mapping_error(context.clone(), e))?;

        let micros: i64 = row.try_get("scheduled_to")?;
        let scheduled_to = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
            RepositoryErrorHelpers::task_mapping_error(
                context.clone(),
                format!("无效的时间戳: {micros}"),
            )
        })?;

        let tries: i64 = row.try_get("tries")?;
        let tries = u16::try_from(tries)
            .map_err(|e| RepositoryErrorHelpers::task_mapping_error(context, e))?;

        Ok(Task {
            id,
            job_name: row.try_get("job")?,
            args: row.try_get("args")?,
            scheduled_to,
            tries,
            running: row.try_get("running")?,
        })
    }
}

#[async_trait]
impl Queue for SqliteQueue {
    #[instrument(skip(self, task), fields(task_id = %task.id, job_name = %task.job_name))]
    async fn enqueue(&self, task: &Task) -> SchedulerResult<()> {
        let context = task_context!(RepositoryOperation::Enqueue, task = task);
        let now = Utc::now().timestamp_micros();

        TimeoutUtils::database(
            async {
                sqlx::query(
                    r#"
                    INSERT INTO worker_tasks (id, job, args, scheduled_to, tries, running, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, 0, ?, ?)
                    "#,
                )
                .bind(task.id.to_string())
                .bind(&task.job_name)
                .bind(&task.args)
                .bind(task.scheduled_to.timestamp_micros())
                .bind(i64::from(task.tries))
                .bind(now)
                .bind(now)
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
        let now = Utc::now().timestamp_micros();

        let row = TimeoutUtils::database(
            async {
                sqlx::query(
                    r#"
                    UPDATE worker_tasks SET
                        running = 1,
                        updated_at = ?1
                    WHERE id = (
                        SELECT id FROM worker_tasks
                        WHERE running = 0 AND scheduled_to <= ?1
                        ORDER BY scheduled_to ASC
                        LIMIT 1
                    )
                    AND running = 0
                    RETURNING id, job, args, scheduled_to, tries, running
                    "#,
                )
                .bind(now)
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
                    UPDATE worker_tasks SET
                        running = 0,
                        tries = tries + 1,
                        scheduled_to = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(to.timestamp_micros())
                .bind(Utc::now().timestamp_micros())
                .bind(task.id.to_string())
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
                sqlx::query("DELETE FROM worker_tasks WHERE id = ?")
                    .bind(task.id.to_string())
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
