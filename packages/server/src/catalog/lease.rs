//! The C2 dispatcher's single-instance lease (§4.1, §5: "exactly one
//! dispatcher instance active at a time, enforced by a lease").

use chrono::{DateTime, Utc};

use super::Catalog;
use crate::error::Result;

impl Catalog {
    /// Attempts to become (or remain) the active dispatcher. Succeeds if no
    /// row exists yet, or the existing lease has expired, or `holder_id`
    /// already holds it (renewal). Returns whether the caller now holds the
    /// lease through `new_expires_at`.
    pub async fn claim_dispatcher_lease(
        &self,
        holder_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO dispatcher_lease (id, holder_id, expires_at) VALUES (TRUE, $1, $2) \
             ON CONFLICT (id) DO UPDATE SET holder_id = EXCLUDED.holder_id, \
             expires_at = EXCLUDED.expires_at \
             WHERE dispatcher_lease.holder_id = EXCLUDED.holder_id \
             OR dispatcher_lease.expires_at < NOW()",
        )
        .bind(holder_id)
        .bind(new_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_dispatcher_lease(&self, holder_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM dispatcher_lease WHERE holder_id = $1")
            .bind(holder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn current_lease_holder(&self) -> Result<Option<(String, DateTime<Utc>)>> {
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT holder_id, expires_at FROM dispatcher_lease WHERE id = TRUE")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }
}
