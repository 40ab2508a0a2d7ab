//! Snapshot persistence (§3, §4.7). Content-addressed dedup lives here;
//! canonicalization and hashing live in [`crate::snapshot`].

use super::Catalog;
use crate::entities::Snapshot;
use crate::error::{NetRavenError, Result};
use crate::id::{DeviceId, JobRunId, SnapshotId};

const SNAPSHOT_COLUMNS: &str = "id, content_hash, bytes, first_seen_at";

impl Catalog {
    /// Inserts a Snapshot, or returns the existing row for `content_hash`
    /// unchanged (§3: "identical configuration bytes across devices or over
    /// time collapse to one stored Snapshot").
    pub async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        if let Some(existing) = self.find_snapshot_by_hash(&snapshot.content_hash).await? {
            return Ok(existing);
        }
        sqlx::query_as::<_, Snapshot>(&format!(
            "INSERT INTO snapshots (id, content_hash, bytes, first_seen_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (content_hash) DO UPDATE SET content_hash = EXCLUDED.content_hash \
             RETURNING {SNAPSHOT_COLUMNS}"
        ))
        .bind(snapshot.id)
        .bind(&snapshot.content_hash)
        .bind(&snapshot.bytes)
        .bind(snapshot.first_seen_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_snapshot_by_hash(&self, content_hash: &str) -> Result<Option<Snapshot>> {
        sqlx::query_as::<_, Snapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE content_hash = $1"
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn get_snapshot(&self, id: SnapshotId) -> Result<Snapshot> {
        sqlx::query_as::<_, Snapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NetRavenError::not_found("snapshot", id))
    }

    /// Records that `(run_id, device_id)` produced this Snapshot. Composite
    /// primary key means re-running the same (run, device) pair overwrites
    /// its own reference rather than accumulating duplicates.
    pub async fn add_snapshot_reference(
        &self,
        run_id: JobRunId,
        device_id: DeviceId,
        snapshot_id: SnapshotId,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshot_references (run_id, device_id, snapshot_id, captured_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (run_id, device_id) DO UPDATE SET snapshot_id = EXCLUDED.snapshot_id",
        )
        .bind(run_id)
        .bind(device_id)
        .bind(snapshot_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every Snapshot ever captured for a device, most recent first — the
    /// history `diff()` picks its two sides from (§6).
    pub async fn snapshot_history_for_device(&self, device_id: DeviceId) -> Result<Vec<Snapshot>> {
        sqlx::query_as::<_, Snapshot>(&format!(
            "SELECT {cols} FROM snapshots s \
             JOIN snapshot_references r ON r.snapshot_id = s.id \
             WHERE r.device_id = $1 \
             ORDER BY s.first_seen_at DESC",
            cols = SNAPSHOT_COLUMNS
                .split(", ")
                .map(|c| format!("s.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// §3: "the most recent Snapshot referencing a given device" — used to
    /// diff a fresh capture against its predecessor without the caller
    /// needing to know the prior run id.
    pub async fn latest_snapshot_for_device(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<Snapshot>> {
        Ok(self.snapshot_history_for_device(device_id).await?.into_iter().next())
    }
}
