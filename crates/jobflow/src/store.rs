use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{StoreError, StoreResult};
use crate::model::{DlqRecord, Job, JobState, ListFilter, NewJob};

/// Durable storage for jobs, DLQ records, and config, plus the one atomic
/// primitive everything else is built on: claiming the next runnable job.
///
/// `pool` is capped at a single connection (see `db::make_pool`); SQLite's
/// own file locking is what actually keeps two worker *processes* from
/// claiming the same row, since each process owns its own connection.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, new_job: NewJob) -> StoreResult<Job> {
        let id = new_job.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let max_retries = match new_job.max_retries {
            Some(max_retries) => max_retries,
            None => self
                .get_config(crate::settings::KEY_MAX_RETRIES)
                .await?
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(crate::settings::Settings::default().max_retries),
        };

        let existing = self.get(&id).await?;
        if existing.is_some() {
            return Err(StoreError::DuplicateId(id));
        }

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                id, command, state, priority, attempts, max_retries,
                locked_by, locked_until, retry_at, run_at, error,
                created_at, updated_at
            )
            VALUES (?1, ?2, 'pending', ?3, 0, ?4, NULL, NULL, NULL, ?5, NULL, ?6, ?6)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&new_job.command)
        .bind(new_job.priority)
        .bind(max_retries)
        .bind(new_job.run_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::DuplicateId(id.clone())
            }
            _ => StoreError::StoreUnavailable(e),
        })?;

        Ok(job)
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list(&self, filter: ListFilter) -> StoreResult<Vec<Job>> {
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let jobs = match filter.state {
            Some(state) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at ASC LIMIT ?2",
                )
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at ASC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(jobs)
    }

    /// The critical primitive (§4.1). `BEGIN IMMEDIATE` grabs SQLite's
    /// RESERVED lock up front, before the candidate SELECT runs, so a second
    /// process attempting the same claim blocks (or waits out
    /// `busy_timeout`) rather than reading the same unclaimed row. There is
    /// no read-then-upgrade window here.
    ///
    /// Uses `self.pool.begin()` rather than hand-rolled `BEGIN`/`COMMIT`
    /// strings: the pool caps out at one connection (db.rs), so an early
    /// return that left a transaction open without rolling it back would
    /// wedge every subsequent Store call on "cannot start a transaction
    /// within a transaction" until the process restarted. `Transaction`'s
    /// `Drop` rolls back automatically on any `?`-propagated error.
    pub async fn claim_next_runnable(
        &self,
        worker_id: i64,
        now: DateTime<Utc>,
        lease_seconds: i64,
    ) -> StoreResult<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE state = 'pending'
              AND (retry_at IS NULL OR retry_at <= ?1)
              AND (run_at IS NULL OR run_at <= ?1)
              AND (locked_until IS NULL OR locked_until < ?1)
            ORDER BY
              CASE WHEN priority > 0 THEN 0 ELSE 1 END ASC,
              priority DESC,
              created_at ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let locked_until = now + chrono::Duration::seconds(lease_seconds);
        let claimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'processing', locked_by = ?1, locked_until = ?2, updated_at = ?3
            WHERE id = ?4
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(locked_until)
        .bind(now)
        .bind(&candidate.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(claimed))
    }

    pub async fn mark_completed(
        &self,
        id: &str,
        worker_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', locked_by = NULL, locked_until = NULL, updated_at = ?1
            WHERE id = ?2 AND locked_by = ?3
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        self.require_lease_held(id, worker_id, result.rows_affected())
            .await
    }

    pub async fn schedule_retry(
        &self,
        id: &str,
        worker_id: i64,
        new_attempts: i64,
        retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', locked_by = NULL, locked_until = NULL,
                attempts = ?1, retry_at = ?2, error = ?3, updated_at = ?4
            WHERE id = ?5 AND locked_by = ?6
            "#,
        )
        .bind(new_attempts)
        .bind(retry_at)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        self.require_lease_held(id, worker_id, result.rows_affected())
            .await
    }

    pub async fn move_to_dlq(
        &self,
        id: &str,
        worker_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead', locked_by = NULL, locked_until = NULL,
                attempts = attempts + 1, error = ?1, updated_at = ?2
            WHERE id = ?3 AND locked_by = ?4
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::LeaseLost(id.to_string(), worker_id));
        }

        sqlx::query("INSERT INTO dlq (job_id, reason, moved_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(reason)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Clears leases that expired without the holder reporting back.
    /// Attempts are NOT bumped: the work simply didn't complete.
    pub async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', locked_by = NULL, locked_until = NULL, updated_at = ?1
            WHERE state = 'processing' AND locked_until < ?1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// `retry_at` is already consulted by `claim_next_runnable`, so this is a
    /// no-op that exists for observability: bump `updated_at` on jobs whose
    /// retry window just opened, so `list`/`status` reflect the transition
    /// without waiting for a claim.
    pub async fn promote_ready_retries(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET updated_at = ?1
            WHERE state = 'pending' AND retry_at IS NOT NULL AND retry_at <= ?1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn retry_from_dlq(&self, id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, error = NULL, retry_at = NULL,
                locked_by = NULL, locked_until = NULL, updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(id.to_string()));
        }

        sqlx::query("DELETE FROM dlq WHERE job_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_dlq(&self, limit: i64) -> StoreResult<Vec<DlqRecord>> {
        let limit = if limit > 0 { limit } else { 100 };
        let rows = sqlx::query_as::<_, DlqRecord>(
            "SELECT * FROM dlq ORDER BY moved_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_config(&self, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_config(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Counts of jobs per state, for the `status` CLI command.
    pub async fn counts_by_state(&self) -> StoreResult<Vec<(JobState, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(s, n)| JobState::from_str(&s).map(|state| (state, n)))
            .collect())
    }

    async fn require_lease_held(
        &self,
        id: &str,
        worker_id: i64,
        rows_affected: u64,
    ) -> StoreResult<()> {
        if rows_affected == 0 {
            return Err(StoreError::LeaseLost(id.to_string(), worker_id));
        }
        Ok(())
    }
}
