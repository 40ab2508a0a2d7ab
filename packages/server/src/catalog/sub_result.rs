//! Device Sub-Result persistence (§3, §4.3).

use sqlx::{Postgres, Transaction};

use super::Catalog;
use crate::entities::DeviceSubResult;
use crate::error::{NetRavenError, Result};
use crate::id::{JobRunId, SubResultId};

const SUB_RESULT_COLUMNS: &str = "id, run_id, device_id, credential_id, status, error_message, \
    snapshot_id, duration_ms, created_at, updated_at";

impl Catalog {
    /// Upsert keyed by `(run_id, device_id)` (§4.3; §8 invariant: "duplicate
    /// delivery of the same (run_id, device_id) produces one row, not two").
    pub async fn upsert_sub_result(&self, sub_result: &DeviceSubResult) -> Result<DeviceSubResult> {
        let mut tx = self.pool.begin().await?;
        let row = self.upsert_sub_result_tx(&mut tx, sub_result).await?;
        tx.commit().await?;
        Ok(row)
    }

    pub(super) async fn upsert_sub_result_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sub_result: &DeviceSubResult,
    ) -> Result<DeviceSubResult> {
        sqlx::query_as::<_, DeviceSubResult>(&format!(
            "INSERT INTO device_sub_results (id, run_id, device_id, credential_id, status, \
             error_message, snapshot_id, duration_ms, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (run_id, device_id) DO UPDATE SET \
             credential_id = EXCLUDED.credential_id, \
             status = EXCLUDED.status, \
             error_message = EXCLUDED.error_message, \
             snapshot_id = EXCLUDED.snapshot_id, \
             duration_ms = EXCLUDED.duration_ms, \
             updated_at = NOW() \
             RETURNING {SUB_RESULT_COLUMNS}"
        ))
        .bind(sub_result.id)
        .bind(sub_result.run_id)
        .bind(sub_result.device_id)
        .bind(sub_result.credential_id)
        .bind(sub_result.status)
        .bind(&sub_result.error_message)
        .bind(sub_result.snapshot_id)
        .bind(sub_result.duration_ms)
        .bind(sub_result.created_at)
        .bind(sub_result.updated_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(Into::into)
    }

    pub async fn get_sub_result(&self, id: SubResultId) -> Result<DeviceSubResult> {
        sqlx::query_as::<_, DeviceSubResult>(&format!(
            "SELECT {SUB_RESULT_COLUMNS} FROM device_sub_results WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NetRavenError::not_found("sub_result", id))
    }

    pub async fn sub_results_for_run(&self, run_id: JobRunId) -> Result<Vec<DeviceSubResult>> {
        sqlx::query_as::<_, DeviceSubResult>(&format!(
            "SELECT {SUB_RESULT_COLUMNS} FROM device_sub_results WHERE run_id = $1 ORDER BY device_id"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }
}
