//! Job persistence (§3, §4.1).

use super::Catalog;
use crate::entities::{Job, JobKind};
use crate::error::{NetRavenError, Result};
use crate::id::JobId;

const JOB_COLUMNS: &str = "id, name, kind, selector, params, enabled, is_system_job, \
    created_at, updated_at";

impl Catalog {
    pub async fn insert_job(&self, job: &Job) -> Result<Job> {
        sqlx::query_as::<_, Job>(&format!(
            "INSERT INTO jobs (id, name, kind, selector, params, enabled, is_system_job, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job.id)
        .bind(&job.name)
        .bind(job.kind)
        .bind(&job.selector)
        .bind(&job.params)
        .bind(job.enabled)
        .bind(job.is_system_job)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| NetRavenError::not_found("job", id))
    }

    pub async fn list_jobs(&self, kind: Option<JobKind>) -> Result<Vec<Job>> {
        match kind {
            Some(kind) => sqlx::query_as::<_, Job>(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE kind = $1 ORDER BY name"
            ))
            .bind(kind)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into),
            None => sqlx::query_as::<_, Job>(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs ORDER BY name"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into),
        }
    }

    /// Jobs with at least one Schedule whose `next_fire_at` has passed — the
    /// dispatcher's scan query (§4.1), joined here so a disabled Job never
    /// surfaces even if its Schedule is technically due.
    pub async fn due_jobs(&self, as_of: chrono::DateTime<chrono::Utc>) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(&format!(
            "SELECT DISTINCT {cols} FROM jobs j \
             JOIN schedules s ON s.job_id = j.id \
             WHERE j.enabled AND s.next_fire_at <= $1 \
             ORDER BY j.id",
            cols = JOB_COLUMNS
                .split(", ")
                .map(|c| format!("j.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn set_job_enabled(&self, id: JobId, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE jobs SET enabled = $1, updated_at = NOW() WHERE id = $2")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_job_selector(&self, id: JobId, selector: &serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE jobs SET selector = $1, updated_at = NOW() WHERE id = $2")
            .bind(selector)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// §3: system Jobs (e.g. the built-in reachability sweep) cannot be
    /// deleted, mirroring `delete_credential`'s `is_system` guard.
    pub async fn delete_job(&self, id: JobId) -> Result<()> {
        let job = self.get_job(id).await?;
        if job.is_system_job {
            return Err(NetRavenError::Conflict(
                "system jobs cannot be deleted".to_string(),
            ));
        }
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
