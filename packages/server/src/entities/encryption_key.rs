//! Encryption Key (§3): the vault's symmetric key metadata row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::EncryptionKeyId;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct EncryptionKey {
    #[builder(default = EncryptionKeyId::new())]
    pub id: EncryptionKeyId,

    #[builder(default = true)]
    pub active: bool,

    #[builder(default, setter(strip_option))]
    pub description: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}
