//! Credential (§3) and its binding to Tags with an effective priority
//! (§3 SUPPLEMENT — modeled as its own row, not a bare join table).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::{CredentialId, TagId};

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Credential {
    #[builder(default = CredentialId::new())]
    pub id: CredentialId,

    pub username: String,

    /// Ciphertext sealed by the vault (C9). Never the plaintext secret.
    pub secret_ciphertext: Vec<u8>,
    /// Id of the encryption key the ciphertext was sealed under, so a
    /// rotation in progress can tell which rows still need re-sealing.
    pub encryption_key_id: crate::id::EncryptionKeyId,

    #[builder(default = 0)]
    pub priority: i32,

    #[builder(default = 0)]
    pub success_count: i64,
    #[builder(default = 0)]
    pub failure_count: i64,

    #[builder(default, setter(strip_option))]
    pub last_used_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub description: Option<String>,

    #[builder(default = false)]
    pub is_system: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Success rate used as a resolver tie-break (§4.6: "higher recent
    /// success rate first"). Credentials with no history sort after ones
    /// with any recorded success.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.last_used_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn record_auth_failure(&mut self) {
        self.failure_count += 1;
        self.updated_at = Utc::now();
    }
}

/// A Tag↔Credential binding with its own priority override (§3 SUPPLEMENT).
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct CredentialTagBinding {
    pub tag_id: TagId,
    pub credential_id: CredentialId,

    #[builder(default = 0)]
    pub priority: i32,
}

impl CredentialTagBinding {
    /// The effective priority a resolver uses for this binding (§4.6:
    /// `min(binding.priority, credential.priority)`).
    pub fn effective_priority(&self, credential: &Credential) -> i32 {
        self.priority.min(credential.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EncryptionKeyId;

    fn sample_credential() -> Credential {
        Credential::builder()
            .username("admin")
            .secret_ciphertext(vec![1, 2, 3])
            .encryption_key_id(EncryptionKeyId::new())
            .build()
    }

    #[test]
    fn success_rate_is_zero_with_no_history() {
        assert_eq!(sample_credential().success_rate(), 0.0);
    }

    #[test]
    fn success_rate_reflects_history() {
        let mut credential = sample_credential();
        credential.record_success();
        credential.record_success();
        credential.record_auth_failure();
        assert!((credential.success_rate() - (2.0 / 3.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn effective_priority_takes_minimum() {
        let credential = Credential::builder()
            .username("admin")
            .secret_ciphertext(vec![])
            .encryption_key_id(EncryptionKeyId::new())
            .priority(5)
            .build();
        let binding = CredentialTagBinding::builder()
            .tag_id(TagId::new())
            .credential_id(credential.id)
            .priority(2)
            .build();
        assert_eq!(binding.effective_priority(&credential), 2);

        let binding_higher = CredentialTagBinding::builder()
            .tag_id(TagId::new())
            .credential_id(credential.id)
            .priority(10)
            .build();
        assert_eq!(binding_higher.effective_priority(&credential), 5);
    }
}
