//! Encryption key metadata persistence (§3, §4.8). The ciphertext/plaintext
//! handling itself lives in [`crate::vault`]; this module only tracks which
//! key is active and which keys still have credentials sealed under them.

use sqlx::{Postgres, Transaction};

use super::Catalog;
use crate::entities::EncryptionKey;
use crate::error::{NetRavenError, Result};
use crate::id::EncryptionKeyId;

const ENCRYPTION_KEY_COLUMNS: &str = "id, active, description, created_at";

impl Catalog {
    pub async fn insert_encryption_key(&self, key: &EncryptionKey) -> Result<EncryptionKey> {
        sqlx::query_as::<_, EncryptionKey>(&format!(
            "INSERT INTO encryption_keys (id, active, description, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {ENCRYPTION_KEY_COLUMNS}"
        ))
        .bind(key.id)
        .bind(key.active)
        .bind(&key.description)
        .bind(key.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn get_encryption_key(&self, id: EncryptionKeyId) -> Result<EncryptionKey> {
        sqlx::query_as::<_, EncryptionKey>(&format!(
            "SELECT {ENCRYPTION_KEY_COLUMNS} FROM encryption_keys WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NetRavenError::not_found("encryption_key", id))
    }

    /// §3 invariant: "at most one active key" — enforced by
    /// `encryption_keys_active_unique`, so this is the only query the vault
    /// needs to find the key to seal new secrets under.
    pub async fn active_encryption_key(&self) -> Result<Option<EncryptionKey>> {
        sqlx::query_as::<_, EncryptionKey>(&format!(
            "SELECT {ENCRYPTION_KEY_COLUMNS} FROM encryption_keys WHERE active"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn list_encryption_keys(&self) -> Result<Vec<EncryptionKey>> {
        sqlx::query_as::<_, EncryptionKey>(&format!(
            "SELECT {ENCRYPTION_KEY_COLUMNS} FROM encryption_keys ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Rotation's first step, inside the caller's transaction: demote the
    /// current active key and insert the new one as active in the same
    /// unit, so the partial unique index never observes two active rows or
    /// zero (§4.8 rotation transaction).
    pub async fn rotate_active_encryption_key_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new_key: &EncryptionKey,
    ) -> Result<()> {
        sqlx::query("UPDATE encryption_keys SET active = FALSE WHERE active")
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "INSERT INTO encryption_keys (id, active, description, created_at) \
             VALUES ($1, TRUE, $2, $3)",
        )
        .bind(new_key.id)
        .bind(&new_key.description)
        .bind(new_key.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Every Credential still sealed under `key_id`, the rotation
    /// transaction's re-sealing worklist.
    pub async fn credential_ids_sealed_under(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key_id: EncryptionKeyId,
    ) -> Result<Vec<crate::id::CredentialId>> {
        let rows: Vec<(crate::id::CredentialId,)> =
            sqlx::query_as("SELECT id FROM credentials WHERE encryption_key_id = $1")
                .bind(key_id)
                .fetch_all(&mut **tx)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
