//! Credential persistence and its Tag bindings (§3, §4.6).

use super::Catalog;
use crate::entities::{Credential, CredentialTagBinding};
use crate::error::{NetRavenError, Result};
use crate::id::{CredentialId, EncryptionKeyId, TagId};

const CREDENTIAL_COLUMNS: &str = "id, username, secret_ciphertext, encryption_key_id, priority, \
    success_count, failure_count, last_used_at, description, is_system, created_at, updated_at";

impl Catalog {
    pub async fn insert_credential(&self, credential: &Credential) -> Result<Credential> {
        sqlx::query_as::<_, Credential>(&format!(
            "INSERT INTO credentials (id, username, secret_ciphertext, encryption_key_id, \
             priority, success_count, failure_count, last_used_at, description, is_system, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {CREDENTIAL_COLUMNS}"
        ))
        .bind(credential.id)
        .bind(&credential.username)
        .bind(&credential.secret_ciphertext)
        .bind(credential.encryption_key_id)
        .bind(credential.priority)
        .bind(credential.success_count)
        .bind(credential.failure_count)
        .bind(credential.last_used_at)
        .bind(&credential.description)
        .bind(credential.is_system)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn get_credential(&self, id: CredentialId) -> Result<Credential> {
        sqlx::query_as::<_, Credential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NetRavenError::not_found("credential", id))
    }

    /// §3: `is_system` credentials are undeletable.
    pub async fn delete_credential(&self, id: CredentialId) -> Result<()> {
        let credential = self.get_credential(id).await?;
        if credential.is_system {
            return Err(NetRavenError::Conflict(
                "system credentials cannot be deleted".to_string(),
            ));
        }
        sqlx::query("DELETE FROM credentials WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// §4.6 AMBIENT: conditional row update, no read-modify-write race.
    pub async fn record_credential_success(&self, id: CredentialId) -> Result<()> {
        sqlx::query(
            "UPDATE credentials SET success_count = success_count + 1, last_used_at = NOW(), \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_credential_auth_failure(&self, id: CredentialId) -> Result<()> {
        sqlx::query("UPDATE credentials SET failure_count = failure_count + 1, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// "Optimize priorities" (§4.6): re-numbers `priority` within a Tag so
    /// resolver order is preserved exactly, purely cosmetic compaction.
    pub async fn set_credential_priority(&self, id: CredentialId, priority: i32) -> Result<()> {
        sqlx::query("UPDATE credentials SET priority = $1, updated_at = NOW() WHERE id = $2")
            .bind(priority)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Re-seals `id`'s ciphertext under a new key. Used only by
    /// `vault::rotate`, inside its single transaction (§4.8).
    pub async fn update_credential_ciphertext(
        &self,
        id: CredentialId,
        ciphertext: &[u8],
        key_id: EncryptionKeyId,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE credentials SET secret_ciphertext = $1, encryption_key_id = $2, \
             updated_at = NOW() WHERE id = $3",
        )
        .bind(ciphertext)
        .bind(key_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn bind_credential_to_tag(
        &self,
        tag_id: TagId,
        credential_id: CredentialId,
        priority: i32,
    ) -> Result<CredentialTagBinding> {
        sqlx::query_as::<_, CredentialTagBinding>(
            "INSERT INTO credential_tag_bindings (tag_id, credential_id, priority) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (tag_id, credential_id) DO UPDATE SET priority = EXCLUDED.priority \
             RETURNING tag_id, credential_id, priority",
        )
        .bind(tag_id)
        .bind(credential_id)
        .bind(priority)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn unbind_credential_from_tag(
        &self,
        tag_id: TagId,
        credential_id: CredentialId,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM credential_tag_bindings WHERE tag_id = $1 AND credential_id = $2",
        )
        .bind(tag_id)
        .bind(credential_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every (binding, credential) pair for every Tag `device_id` belongs
    /// to — the raw candidate set §4.6's resolver ranks.
    pub async fn candidate_credentials_for_device(
        &self,
        device_id: crate::id::DeviceId,
    ) -> Result<Vec<(CredentialTagBinding, Credential)>> {
        let rows = sqlx::query_as::<_, CredentialCandidateRow>(&format!(
            "SELECT ctb.tag_id, ctb.credential_id, ctb.priority AS binding_priority, \
             {cols} \
             FROM credential_tag_bindings ctb \
             JOIN device_tags dt ON dt.tag_id = ctb.tag_id \
             JOIN credentials c ON c.id = ctb.credential_id \
             WHERE dt.device_id = $1",
            cols = CREDENTIAL_COLUMNS
                .split(", ")
                .map(|c| format!("c.{c} AS cred_{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CredentialCandidateRow::split).collect())
    }
}

#[derive(sqlx::FromRow)]
struct CredentialCandidateRow {
    tag_id: TagId,
    credential_id: CredentialId,
    binding_priority: i32,
    cred_id: CredentialId,
    cred_username: String,
    cred_secret_ciphertext: Vec<u8>,
    cred_encryption_key_id: EncryptionKeyId,
    cred_priority: i32,
    cred_success_count: i64,
    cred_failure_count: i64,
    cred_last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    cred_description: Option<String>,
    cred_is_system: bool,
    cred_created_at: chrono::DateTime<chrono::Utc>,
    cred_updated_at: chrono::DateTime<chrono::Utc>,
}

impl CredentialCandidateRow {
    fn split(self) -> (CredentialTagBinding, Credential) {
        let binding = CredentialTagBinding::builder()
            .tag_id(self.tag_id)
            .credential_id(self.credential_id)
            .priority(self.binding_priority)
            .build();
        let credential = Credential::builder()
            .id(self.cred_id)
            .username(self.cred_username)
            .secret_ciphertext(self.cred_secret_ciphertext)
            .encryption_key_id(self.cred_encryption_key_id)
            .priority(self.cred_priority)
            .success_count(self.cred_success_count)
            .failure_count(self.cred_failure_count)
            .last_used_at(self.cred_last_used_at)
            .description(self.cred_description)
            .is_system(self.cred_is_system)
            .created_at(self.cred_created_at)
            .updated_at(self.cred_updated_at)
            .build();
        (binding, credential)
    }
}
