//! Tag (§3): a label used to group Devices and to bind Credentials with a
//! priority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::TagId;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Tag {
    #[builder(default = TagId::new())]
    pub id: TagId,

    pub name: String,

    #[builder(default, setter(strip_option))]
    pub tag_type: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Tag {
    /// Tags are compared case-insensitively for uniqueness (§3: "display
    /// name (unique, case-insensitive)").
    pub fn normalized_name(&self) -> String {
        self.name.to_lowercase()
    }
}
