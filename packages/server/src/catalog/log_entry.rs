//! Structured Log Store persistence (§3, §4.7, §6).

use super::Catalog;
use crate::entities::{LogEntry, LogLevel, LogSource};
use crate::error::Result;
use crate::id::{DeviceId, JobRunId};

const LOG_ENTRY_COLUMNS: &str =
    "id, ts, level, source, job_run_id, device_id, message, meta";

impl Catalog {
    /// Writer-task-only insert (§4.7: the log store owns one writer; callers
    /// never write directly). `entry.message`/`entry.meta` are assumed
    /// already redacted by the time they reach here.
    pub async fn insert_log_entry(&self, entry: &LogEntry) -> Result<LogEntry> {
        sqlx::query_as::<_, LogEntry>(&format!(
            "INSERT INTO log_entries (id, ts, level, source, job_run_id, device_id, message, meta) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {LOG_ENTRY_COLUMNS}"
        ))
        .bind(entry.id)
        .bind(entry.ts)
        .bind(entry.level)
        .bind(entry.source)
        .bind(entry.job_run_id)
        .bind(entry.device_id)
        .bind(&entry.message)
        .bind(&entry.meta)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn logs_for_job_run(
        &self,
        job_run_id: JobRunId,
        min_level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>> {
        match min_level {
            Some(level) => sqlx::query_as::<_, LogEntry>(&format!(
                "SELECT {LOG_ENTRY_COLUMNS} FROM log_entries \
                 WHERE job_run_id = $1 AND level >= $2 ORDER BY ts"
            ))
            .bind(job_run_id)
            .bind(level)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into),
            None => sqlx::query_as::<_, LogEntry>(&format!(
                "SELECT {LOG_ENTRY_COLUMNS} FROM log_entries WHERE job_run_id = $1 ORDER BY ts"
            ))
            .bind(job_run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into),
        }
    }

    pub async fn logs_for_device(&self, device_id: DeviceId) -> Result<Vec<LogEntry>> {
        sqlx::query_as::<_, LogEntry>(&format!(
            "SELECT {LOG_ENTRY_COLUMNS} FROM log_entries WHERE device_id = $1 ORDER BY ts DESC LIMIT 500"
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// §3: "lifetime bounded by retention policy per source." Deletes every
    /// row of `source` older than `cutoff` in one statement; called
    /// periodically by the log store's prune task, not per-entry.
    pub async fn prune_log_entries(&self, source: LogSource, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM log_entries WHERE source = $1 AND ts < $2")
            .bind(source)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
