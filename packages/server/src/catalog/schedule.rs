//! Schedule persistence (§3) and the dispatcher's atomic advance (§4.1, §5).

use sqlx::{Postgres, Transaction};

use super::Catalog;
use crate::entities::Schedule;
use crate::error::{NetRavenError, Result};
use crate::id::{JobId, ScheduleId};

const SCHEDULE_COLUMNS: &str =
    "id, job_id, kind, timezone, next_fire_at, last_fired_at, created_at, updated_at";

impl Catalog {
    pub async fn insert_schedule(&self, schedule: &Schedule) -> Result<Schedule> {
        sqlx::query_as::<_, Schedule>(&format!(
            "INSERT INTO schedules (id, job_id, kind, timezone, next_fire_at, last_fired_at, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {SCHEDULE_COLUMNS}"
        ))
        .bind(schedule.id)
        .bind(schedule.job_id)
        .bind(&schedule.kind)
        .bind(&schedule.timezone)
        .bind(schedule.next_fire_at)
        .bind(schedule.last_fired_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn get_schedule(&self, id: ScheduleId) -> Result<Schedule> {
        sqlx::query_as::<_, Schedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NetRavenError::not_found("schedule", id))
    }

    pub async fn schedules_for_job(&self, job_id: JobId) -> Result<Vec<Schedule>> {
        sqlx::query_as::<_, Schedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Schedules due at or before `as_of`, in ascending `next_fire_at` order
    /// (§4.1: "scans schedules in ascending next-fire order"), locked for
    /// the duration of the dispatcher's transaction so two dispatcher
    /// instances racing past the lease check cannot double-fire one.
    pub async fn due_schedules(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        as_of: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Schedule>> {
        sqlx::query_as::<_, Schedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules \
             WHERE next_fire_at <= $1 \
             ORDER BY next_fire_at \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(as_of)
        .fetch_all(&mut **tx)
        .await
        .map_err(Into::into)
    }

    /// Advances `next_fire_at`/`last_fired_at` for a Schedule that just
    /// fired, in the same transaction as the enqueue that produced its Job
    /// Run (§5: "enqueue + next-fire advance" is one atomic unit — a crash
    /// between the two would either duplicate or drop a fire, never both
    /// happening independently).
    pub async fn advance_schedule(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: ScheduleId,
        fired_at: chrono::DateTime<chrono::Utc>,
        next_fire_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE schedules SET last_fired_at = $1, next_fire_at = $2, updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(fired_at)
        .bind(next_fire_at)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        self.pool.begin().await.map_err(Into::into)
    }
}
