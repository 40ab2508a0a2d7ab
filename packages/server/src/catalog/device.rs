//! Device persistence (§3). `Device` is assembled by hand because
//! `last_reachability` spans three flat columns, not one.

use sqlx::{FromRow, Row};

use super::Catalog;
use crate::entities::{Device, Reachability, ReachabilityStatus, TransportKind};
use crate::error::{NetRavenError, Result};
use crate::id::{DeviceId, TagId};

#[derive(FromRow)]
struct DeviceRow {
    id: DeviceId,
    hostname: String,
    host: String,
    transport_kind: TransportKind,
    port: i32,
    description: Option<String>,
    model: Option<String>,
    serial: Option<String>,
    owner_id: uuid::Uuid,
    reachability_status: ReachabilityStatus,
    reachability_checked_at: chrono::DateTime<chrono::Utc>,
    reachability_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device::builder()
            .id(row.id)
            .hostname(row.hostname)
            .host(row.host)
            .transport_kind(row.transport_kind)
            .port(row.port)
            .description(row.description)
            .model(row.model)
            .serial(row.serial)
            .owner_id(row.owner_id)
            .last_reachability(Reachability {
                status: row.reachability_status,
                checked_at: row.reachability_checked_at,
                message: row.reachability_message,
            })
            .created_at(row.created_at)
            .updated_at(row.updated_at)
            .build()
    }
}

const DEVICE_COLUMNS: &str = "id, hostname, host, transport_kind, port, description, model, \
    serial, owner_id, reachability_status, reachability_checked_at, reachability_message, \
    created_at, updated_at";

impl Catalog {
    pub async fn insert_device(&self, device: &Device) -> Result<Device> {
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "INSERT INTO devices (id, hostname, host, transport_kind, port, description, model, \
             serial, owner_id, reachability_status, reachability_checked_at, reachability_message, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(device.id)
        .bind(&device.hostname)
        .bind(&device.host)
        .bind(device.transport_kind)
        .bind(device.port)
        .bind(&device.description)
        .bind(&device.model)
        .bind(&device.serial)
        .bind(device.owner_id)
        .bind(device.last_reachability.status)
        .bind(device.last_reachability.checked_at)
        .bind(&device.last_reachability.message)
        .bind(device.created_at)
        .bind(device.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get_device(&self, id: DeviceId) -> Result<Device> {
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NetRavenError::not_found("device", id))?;
        Ok(row.into())
    }

    pub async fn update_device_reachability(
        &self,
        id: DeviceId,
        status: ReachabilityStatus,
        message: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE devices SET reachability_status = $1, reachability_checked_at = NOW(), \
             reachability_message = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(status)
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes a Device. §3: "deleted only when no live Job Runs reference
    /// it" — the caller is responsible for that check; this is the raw
    /// delete the service layer guards.
    pub async fn delete_device(&self, id: DeviceId) -> Result<()> {
        sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_device_tag(&self, device_id: DeviceId, tag_id: TagId) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_tags (device_id, tag_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(device_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_device_tag(&self, device_id: DeviceId, tag_id: TagId) -> Result<()> {
        sqlx::query("DELETE FROM device_tags WHERE device_id = $1 AND tag_id = $2")
            .bind(device_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Devices carrying a given Tag (§4.6 resolver input; §4.3 device-set
    /// resolution).
    pub async fn devices_for_tag(&self, tag_id: TagId) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices d \
             JOIN device_tags dt ON dt.device_id = d.id \
             WHERE dt.tag_id = $1 \
             ORDER BY d.id"
        ))
        .bind(tag_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn tags_for_device(&self, device_id: DeviceId) -> Result<Vec<TagId>> {
        let rows = sqlx::query("SELECT tag_id FROM device_tags WHERE device_id = $1")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<TagId, _>("tag_id")).collect())
    }

    /// Whether any Job Run still references this device in its
    /// `resolved_devices` snapshot (§3: a Device may only be deleted when no
    /// live Job Runs reference it).
    pub async fn device_has_live_job_runs(&self, device_id: DeviceId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_runs \
             WHERE $1 = ANY(resolved_devices) AND status IN ('queued', 'running')",
        )
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}
