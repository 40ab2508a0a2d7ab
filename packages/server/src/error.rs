//! Crate-wide error taxonomy.
//!
//! `NetRavenError` covers failures that cross component boundaries (catalog
//! access, queue operations, device sessions, the vault). Component-local
//! detail that never needs to propagate past its component lives in smaller
//! enums such as [`DeviceErrorKind`].

use thiserror::Error;

use crate::id::{DeviceId, JobId};

/// Top-level error type returned by public APIs across the crate.
#[derive(Debug, Error)]
pub enum NetRavenError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("authentication failed for device {device_id}")]
    AuthFailure { device_id: DeviceId },

    #[error("device {device_id} unreachable: {reason}")]
    Unreachable { device_id: DeviceId, reason: String },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("vault error: {0}")]
    VaultError(String),

    #[error("queue unavailable: {0}")]
    QueueLoss(String),

    #[error("catalog unavailable: {0}")]
    CatalogLoss(String),

    #[error("job {job_id} was cancelled")]
    Cancelled { job_id: JobId },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetRavenError {
    /// Whether retrying the operation that produced this error is ever
    /// worthwhile. Validation/conflict/not-found errors are not; anything
    /// network- or resource-shaped might resolve on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetRavenError::Unreachable { .. }
                | NetRavenError::Timeout(_)
                | NetRavenError::ProtocolError(_)
                | NetRavenError::QueueLoss(_)
                | NetRavenError::CatalogLoss(_)
                | NetRavenError::Database(_)
                | NetRavenError::Io(_)
        )
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        NetRavenError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetRavenError>;

/// Outcome classification for a single device sub-result (§3 Device Sub-Result).
///
/// Distinct from `NetRavenError` because sub-result status is persisted data,
/// not a propagated failure: a job run with ten device sub-results can carry
/// ten different kinds side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "device_error_kind", rename_all = "snake_case")]
pub enum DeviceErrorKind {
    Success,
    Unreachable,
    AuthFailure,
    Timeout,
    CommandError,
    ProtocolError,
    Aborted,
}

impl DeviceErrorKind {
    pub fn is_success(self) -> bool {
        matches!(self, DeviceErrorKind::Success)
    }

    /// Whether a sub-result in this state should count toward a retry of the
    /// owning job. Aborted (cooperative cancellation) and command errors
    /// (device rejected input) never benefit from retrying as-is.
    pub fn should_retry(self) -> bool {
        matches!(
            self,
            DeviceErrorKind::Unreachable | DeviceErrorKind::Timeout | DeviceErrorKind::ProtocolError
        )
    }
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceErrorKind::Success => "success",
            DeviceErrorKind::Unreachable => "unreachable",
            DeviceErrorKind::AuthFailure => "auth_failure",
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::CommandError => "command_error",
            DeviceErrorKind::ProtocolError => "protocol_error",
            DeviceErrorKind::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_loss_is_retryable() {
        assert!(NetRavenError::CatalogLoss("pool exhausted".into()).is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!NetRavenError::Validation("bad host".into()).is_retryable());
    }

    #[test]
    fn device_error_kind_retry_rules() {
        assert!(DeviceErrorKind::Timeout.should_retry());
        assert!(!DeviceErrorKind::Aborted.should_retry());
        assert!(!DeviceErrorKind::CommandError.should_retry());
        assert!(DeviceErrorKind::Success.is_success());
    }
}
