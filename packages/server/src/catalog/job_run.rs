//! Job Run persistence (§3, §4.3).

use sqlx::{Postgres, Transaction};

use super::Catalog;
use crate::entities::{JobRun, JobRunStatus};
use crate::error::{NetRavenError, Result};
use crate::id::{JobId, JobRunId};

const JOB_RUN_COLUMNS: &str =
    "id, job_id, resolved_devices, status, started_at, finished_at, cancel_requested, created_at";

impl Catalog {
    /// Inserts the Job Run and its `queue_items` row in one transaction, so
    /// a run can never exist without being queued (§5 enqueue atomicity).
    /// Standalone callers (the API, tests) that don't need to fold this into
    /// a larger transaction; the dispatcher uses `enqueue_job_run_tx`
    /// instead so the enqueue and its schedule advance commit together.
    pub async fn enqueue_job_run(&self, run: &JobRun, priority: i16) -> Result<JobRun> {
        let mut tx = self.pool.begin().await?;
        let inserted = self.enqueue_job_run_tx(&mut tx, run, priority).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Same insert as `enqueue_job_run`, scoped to a caller-owned
    /// transaction so it can commit atomically alongside other writes (§5:
    /// "enqueue + next-fire advance" is one atomic unit for the dispatcher).
    pub async fn enqueue_job_run_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        run: &JobRun,
        priority: i16,
    ) -> Result<JobRun> {
        let inserted = sqlx::query_as::<_, JobRun>(&format!(
            "INSERT INTO job_runs (id, job_id, resolved_devices, status, started_at, \
             finished_at, cancel_requested, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {JOB_RUN_COLUMNS}"
        ))
        .bind(run.id)
        .bind(run.job_id)
        .bind(&run.resolved_devices)
        .bind(run.status)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.cancel_requested)
        .bind(run.created_at)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO queue_items (run_id, priority, available_at) VALUES ($1, $2, NOW())",
        )
        .bind(inserted.id)
        .bind(priority)
        .execute(&mut **tx)
        .await?;

        Ok(inserted)
    }

    pub async fn get_job_run(&self, id: JobRunId) -> Result<JobRun> {
        sqlx::query_as::<_, JobRun>(&format!(
            "SELECT {JOB_RUN_COLUMNS} FROM job_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NetRavenError::not_found("job_run", id))
    }

    pub async fn list_job_runs(&self, job_id: Option<JobId>) -> Result<Vec<JobRun>> {
        match job_id {
            Some(job_id) => sqlx::query_as::<_, JobRun>(&format!(
                "SELECT {JOB_RUN_COLUMNS} FROM job_runs WHERE job_id = $1 ORDER BY created_at DESC"
            ))
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into),
            None => sqlx::query_as::<_, JobRun>(&format!(
                "SELECT {JOB_RUN_COLUMNS} FROM job_runs ORDER BY created_at DESC LIMIT 200"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into),
        }
    }

    /// §3 invariant: status only moves forward. The `WHERE` clause enforces
    /// it at the database layer too, not just in `JobRun::transition_to`, so
    /// a racing worker can't undo a cancellation.
    pub async fn transition_job_run(
        &self,
        id: JobRunId,
        status: JobRunStatus,
    ) -> Result<bool> {
        let timestamp_clause = if status == JobRunStatus::Running {
            "started_at = NOW()"
        } else {
            "finished_at = NOW()"
        };
        let result = sqlx::query(&format!(
            "UPDATE job_runs SET status = $1, {timestamp_clause} \
             WHERE id = $2 AND status NOT IN ('completed_success', 'completed_failed', \
             'failed_error', 'cancelled', 'no_devices')"
        ))
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn request_cancellation(&self, id: JobRunId) -> Result<()> {
        sqlx::query("UPDATE job_runs SET cancel_requested = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_cancellation_requested(&self, id: JobRunId) -> Result<bool> {
        let requested: bool =
            sqlx::query_scalar("SELECT cancel_requested FROM job_runs WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(requested)
    }

    /// Terminal transition plus its trailing Sub-Result write, atomically
    /// (§5: "sub-result write + terminal status" is one unit so a crash
    /// mid-write cannot leave a run `running` forever with no sub-results,
    /// or `completed` with a sub-result still pending).
    pub async fn finish_job_run_with_sub_result(
        &self,
        run_id: JobRunId,
        status: JobRunStatus,
        sub_result: &crate::entities::DeviceSubResult,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.upsert_sub_result_tx(&mut tx, sub_result).await?;
        sqlx::query(
            "UPDATE job_runs SET status = $1, finished_at = NOW() \
             WHERE id = $2 AND status NOT IN ('completed_success', 'completed_failed', \
             'failed_error', 'cancelled', 'no_devices')",
        )
        .bind(status)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
