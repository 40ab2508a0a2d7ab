//! Device (§3): a network element the platform connects to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::id::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transport_kind", rename_all = "snake_case")]
pub enum TransportKind {
    Ssh,
    Telnet,
    RestApi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "reachability_status", rename_all = "snake_case")]
pub enum ReachabilityStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// A Device's last-known reachability, refreshed by the reachability job
/// (§4.9) and by any successful session regardless of job kind.
///
/// Stored as three flat columns (`reachability_status`, `reachability_checked_at`,
/// `reachability_message`) rather than a Postgres composite type — `catalog::device`
/// assembles this by hand from the row, the same flattened-columns approach the
/// catalog uses for every nested value (see `catalog::job::JobSelector`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reachability {
    pub status: ReachabilityStatus,
    pub checked_at: DateTime<Utc>,
    pub message: Option<String>,
}

impl Default for Reachability {
    fn default() -> Self {
        Self {
            status: ReachabilityStatus::Unknown,
            checked_at: Utc::now(),
            message: None,
        }
    }
}

/// Assembled from the `devices` row by `catalog::device` (not `#[derive(FromRow)]`:
/// `last_reachability` spans three flat columns, not one).
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Device {
    #[builder(default = DeviceId::new())]
    pub id: DeviceId,

    pub hostname: String,
    pub host: String,
    pub transport_kind: TransportKind,
    pub port: i32,

    #[builder(default, setter(strip_option))]
    pub description: Option<String>,
    #[builder(default, setter(strip_option))]
    pub model: Option<String>,
    #[builder(default, setter(strip_option))]
    pub serial: Option<String>,

    pub owner_id: uuid::Uuid,

    #[builder(default)]
    pub last_reachability: Reachability,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Default port for the device's transport kind, used when the caller
    /// does not supply one explicitly.
    pub fn default_port(kind: TransportKind) -> i32 {
        match kind {
            TransportKind::Ssh => 22,
            TransportKind::Telnet => 23,
            TransportKind::RestApi => 443,
        }
    }

    pub fn mark_reachability(&mut self, status: ReachabilityStatus, message: Option<String>) {
        self.last_reachability = Reachability {
            status,
            checked_at: Utc::now(),
            message,
        };
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_match_transport_kind() {
        assert_eq!(Device::default_port(TransportKind::Ssh), 22);
        assert_eq!(Device::default_port(TransportKind::Telnet), 23);
        assert_eq!(Device::default_port(TransportKind::RestApi), 443);
    }

    #[test]
    fn mark_reachability_updates_timestamp() {
        let mut device = Device::builder()
            .hostname("sw1")
            .host("10.0.0.1")
            .transport_kind(TransportKind::Ssh)
            .port(22)
            .owner_id(uuid::Uuid::new_v4())
            .build();
        let before = device.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(1));
        device.mark_reachability(ReachabilityStatus::Reachable, None);
        assert_eq!(device.last_reachability.status, ReachabilityStatus::Reachable);
        assert!(device.updated_at > before);
    }
}
