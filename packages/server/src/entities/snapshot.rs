//! Snapshot (§3): content-addressed, immutable configuration bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::SnapshotId;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Snapshot {
    #[builder(default = SnapshotId::new())]
    pub id: SnapshotId,

    /// Hex-encoded SHA-256 of the canonicalized bytes; unique (§6).
    pub content_hash: String,

    pub bytes: Vec<u8>,

    #[builder(default = Utc::now())]
    pub first_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_bytes() {
        let snapshot = Snapshot::builder()
            .content_hash("deadbeef".to_string())
            .bytes(b"hostname r1".to_vec())
            .build();
        assert_eq!(snapshot.bytes, b"hostname r1");
    }
}
