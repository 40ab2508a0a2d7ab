//! C3 Durable Queue (§4.2): `queue_items` rows claimed with `FOR UPDATE SKIP
//! LOCKED`, generalized from the teacher's `Job::claim_jobs`
//! (`kernel/jobs/job.rs`) from one `jobs` table doing double duty as both
//! catalog and queue into a dedicated queue table keyed by Job Run id.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::id::JobRunId;

const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// One claimed (or claimable) work item.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueItem {
    pub run_id: JobRunId,
    pub priority: i16,
    pub available_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub dead_letter: bool,
    pub last_error: Option<String>,
    pub claimed_by: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

const QUEUE_ITEM_COLUMNS: &str = "run_id, priority, available_at, attempts, max_attempts, \
    dead_letter, last_error, claimed_by, enqueued_at";

/// Handle to the durable queue. Shares the catalog's Postgres pool rather
/// than a second broker technology (§4.2 AMBIENT, §9 resolved Open
/// Question).
#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
}

impl Queue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// §4.2: "persists the item; total order within a priority class is
    /// FIFO." Most callers go through `Catalog::enqueue_job_run`, which
    /// inserts this row in the same transaction as the Job Run itself; this
    /// method exists for callers (tests, replay tooling) that already hold
    /// a Job Run id and only need the queue side.
    pub async fn enqueue(&self, run_id: JobRunId, priority: i16) -> Result<()> {
        sqlx::query(
            "INSERT INTO queue_items (run_id, priority, available_at, max_attempts) \
             VALUES ($1, $2, NOW(), $3) \
             ON CONFLICT (run_id) DO NOTHING",
        )
        .bind(run_id)
        .bind(priority)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically assigns one claimable item to `worker_id` and sets its
    /// invisibility deadline to `now + visibility`. Folds `reap()` into the
    /// same statement exactly as the teacher's CTE does: the `available_at
    /// <= NOW()` branch picks up both freshly-enqueued items and items whose
    /// previous claim's visibility deadline has lapsed, mirroring the
    /// teacher's `OR (status = 'running' AND lease_expires_at < NOW())`.
    pub async fn claim(
        &self,
        worker_id: &str,
        visibility: std::time::Duration,
    ) -> Result<Option<QueueItem>> {
        let visibility_secs = visibility.as_secs() as f64;
        let item = sqlx::query_as::<_, QueueItem>(&format!(
            "WITH next_item AS ( \
                SELECT run_id FROM queue_items \
                WHERE NOT dead_letter AND available_at <= NOW() \
                ORDER BY priority, available_at \
                LIMIT 1 \
                FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE queue_items \
             SET available_at = NOW() + make_interval(secs => $1), \
                 attempts = attempts + 1, \
                 claimed_by = $2 \
             WHERE run_id IN (SELECT run_id FROM next_item) \
             RETURNING {QUEUE_ITEM_COLUMNS}"
        ))
        .bind(visibility_secs)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// Removes a claimed item on successful completion (§4.2: "removes a
    /// claimed item").
    pub async fn ack(&self, run_id: JobRunId) -> Result<()> {
        sqlx::query("DELETE FROM queue_items WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the item to the queue after `retry_after`, recording `reason`.
    /// Once `attempts` has reached `max_attempts` the item moves to the
    /// dead letter instead of becoming claimable again (§4.2: "after
    /// `max_attempts` (default 3) a `nack` instead moves the item to a
    /// dead-letter with the last reason").
    pub async fn nack(
        &self,
        run_id: JobRunId,
        reason: &str,
        retry_after: std::time::Duration,
    ) -> Result<()> {
        let retry_after_secs = retry_after.as_secs() as f64;
        sqlx::query(
            "UPDATE queue_items SET \
                 last_error = $1, \
                 claimed_by = NULL, \
                 dead_letter = (attempts >= max_attempts), \
                 available_at = CASE WHEN attempts >= max_attempts THEN available_at \
                                      ELSE NOW() + make_interval(secs => $2) END \
             WHERE run_id = $3",
        )
        .bind(reason)
        .bind(retry_after_secs)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Periodic reaper (§4.2): ages claims whose visibility deadline has
    /// long since lapsed and whose `attempts` is already exhausted into the
    /// dead letter — `claim`'s own `available_at <= NOW()` branch already
    /// recovers items that still have attempts left, so this only needs to
    /// catch the exhausted tail `claim` would otherwise keep recycling
    /// forever.
    pub async fn reap_exhausted(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE queue_items SET dead_letter = TRUE, claimed_by = NULL \
             WHERE NOT dead_letter AND available_at <= NOW() AND attempts >= max_attempts",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, run_id: JobRunId) -> Result<Option<QueueItem>> {
        sqlx::query_as::<_, QueueItem>(&format!(
            "SELECT {QUEUE_ITEM_COLUMNS} FROM queue_items WHERE run_id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn dead_letter_items(&self) -> Result<Vec<QueueItem>> {
        sqlx::query_as::<_, QueueItem>(&format!(
            "SELECT {QUEUE_ITEM_COLUMNS} FROM queue_items WHERE dead_letter ORDER BY enqueued_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Operator replay: clears `dead_letter` and resets `attempts` so the
    /// item is claimable again.
    pub async fn requeue_dead_letter(&self, run_id: JobRunId) -> Result<()> {
        sqlx::query(
            "UPDATE queue_items SET dead_letter = FALSE, attempts = 0, last_error = NULL, \
             available_at = NOW() WHERE run_id = $1",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Claim/ack/nack/reap all depend on `FOR UPDATE SKIP LOCKED` semantics
    // a real Postgres instance provides; exercised in tests/seed_scenarios.rs.
}
