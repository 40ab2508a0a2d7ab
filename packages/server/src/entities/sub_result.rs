//! Device Sub-Result (§3), owned by a Job Run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::error::DeviceErrorKind;
use crate::id::{CredentialId, DeviceId, JobRunId, SnapshotId, SubResultId};

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct DeviceSubResult {
    #[builder(default = SubResultId::new())]
    pub id: SubResultId,

    pub run_id: JobRunId,
    pub device_id: DeviceId,

    #[builder(default, setter(strip_option))]
    pub credential_id: Option<CredentialId>,

    pub status: DeviceErrorKind,

    /// Already redacted by the time it reaches this struct; see
    /// `crate::redaction`.
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    #[builder(default, setter(strip_option))]
    pub snapshot_id: Option<SnapshotId>,

    #[builder(default, setter(strip_option))]
    pub duration_ms: Option<i64>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl DeviceSubResult {
    /// The natural upsert key (§4.3: "upserts keyed by (run_id,
    /// device_id)").
    pub fn upsert_key(&self) -> (JobRunId, DeviceId) {
        (self.run_id, self.device_id)
    }
}
