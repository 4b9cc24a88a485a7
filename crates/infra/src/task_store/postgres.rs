//! Postgres-backed task store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | TaskStoreError |
//! |------------|----------------------|----------------|
//! | Database (unique violation on insert) | `23505` | `AlreadyExists` |
//! | Database (other) | any | `Query` |
//! | PoolClosed / Io / Tls / PoolTimedOut | N/A | `Connection` |
//! | ColumnDecode / Decode | N/A | `Decode` |
//! | Other | N/A | `Query` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use taskpipe_core::{Priority, StatusUpdate, Task, TaskId, TaskStatus};

use super::{CompletionMetrics, TaskStore, TaskStoreError};

const SCHEMA: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE task_status AS ENUM ('pending', 'processing', 'done', 'failed');
    EXCEPTION
        WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id          UUID PRIMARY KEY,
        payload     TEXT NOT NULL,
        priority    INTEGER NOT NULL CHECK (priority BETWEEN 0 AND 10),
        status      task_status NOT NULL DEFAULT 'pending',
        result      TEXT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Task store over a shared SQLx pool.
///
/// The pool is `Send + Sync` and handles its own connection management; the
/// store is cloned freely across services.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: Arc<PgPool>,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, TaskStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| TaskStoreError::Connection(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Create the `task_status` enum and `tasks` table if missing.
    pub async fn ensure_schema(&self) -> Result<(), TaskStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    async fn insert(&self, task: &Task) -> Result<(), TaskStoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, payload, priority, status, result, created_at, updated_at)
            VALUES ($1, $2, $3, $4::task_status, $5, $6, $7)
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(&task.payload)
        .bind(task.priority.value())
        .bind(task.status.as_str())
        .bind(task.result.as_deref())
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                TaskStoreError::AlreadyExists(task.id)
            } else {
                map_sqlx_error("insert", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id), err)]
    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, payload, priority, status::text AS status, result, created_at, updated_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| TaskRow::from_row(&r).and_then(TaskRow::into_task))
            .transpose()
    }

    #[instrument(
        skip(self, update),
        fields(task_id = %id, status = %update.status(), rows_affected = tracing::field::Empty),
        err
    )]
    async fn update_status(
        &self,
        id: TaskId,
        update: &StatusUpdate,
        at: DateTime<Utc>,
    ) -> Result<u64, TaskStoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2::task_status,
                result = $3,
                updated_at = GREATEST(updated_at, $4)
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(update.status().as_str())
        .bind(update.result())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        let rows = done.rows_affected();
        Span::current().record("rows_affected", rows);
        Ok(rows)
    }

    #[instrument(skip(self), err)]
    async fn completion_metrics(&self) -> Result<CompletionMetrics, TaskStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::bigint AS total,
                   AVG(EXTRACT(EPOCH FROM (updated_at - created_at)))::float8 AS avg_sec
            FROM tasks
            WHERE status = 'done'
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("completion_metrics", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| TaskStoreError::Decode(e.to_string()))?;
        let avg_sec: Option<f64> = row
            .try_get("avg_sec")
            .map_err(|e| TaskStoreError::Decode(e.to_string()))?;

        Ok(CompletionMetrics {
            total_tasks: total.max(0) as u64,
            average_processing_time_ms: avg_sec.map(|s| (s * 1000.0).round() as i64),
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TaskStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            TaskStoreError::Query(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            TaskStoreError::Connection(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => TaskStoreError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => TaskStoreError::Connection(format!("tls error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            TaskStoreError::Decode(format!("{operation}: {err}"))
        }
        _ => TaskStoreError::Query(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

// SQLx row types

#[derive(Debug)]
struct TaskRow {
    id: uuid::Uuid,
    payload: String,
    priority: i32,
    status: String,
    result: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, TaskStoreError> {
        let decode = |e: sqlx::Error| TaskStoreError::Decode(e.to_string());
        Ok(TaskRow {
            id: row.try_get("id").map_err(decode)?,
            payload: row.try_get("payload").map_err(decode)?,
            priority: row.try_get("priority").map_err(decode)?,
            status: row.try_get("status").map_err(decode)?,
            result: row.try_get("result").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }

    fn into_task(self) -> Result<Task, TaskStoreError> {
        let status: TaskStatus = self
            .status
            .parse()
            .map_err(|e: taskpipe_core::DomainError| TaskStoreError::Decode(e.to_string()))?;
        let priority = Priority::new(self.priority)
            .map_err(|e| TaskStoreError::Decode(e.to_string()))?;

        Ok(Task {
            id: TaskId::from_uuid(self.id),
            payload: self.payload,
            priority,
            status,
            result: self.result,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
