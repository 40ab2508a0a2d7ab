//! C7 Snapshot Store (§4.5): canonicalization, content hashing, and diffing
//! of device configuration captures. Persistence and dedup-on-insert live
//! in `catalog::snapshot`; this module is the pure logic layer above it.

use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};

use crate::catalog::Catalog;
use crate::entities::Snapshot;
use crate::error::{NetRavenError, Result};
use crate::id::{DeviceId, JobRunId, SnapshotId};

/// Normalizes trailing whitespace and line endings only (§4.5: "MUST NOT
/// rewrite comments, reorder lines, or drop blanks that change semantics").
/// Deliberately more conservative than the teacher's own
/// `generate_content_hash`, which lowercases and strips all non-alphanumeric
/// characters — too aggressive for a spec that needs byte-level fidelity
/// modulo only the whitespace device vendors are inconsistent about.
pub fn canonicalize(bytes: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(bytes);
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

/// Hex-encoded SHA-256 over canonicalized bytes (§4.5). Reuses the
/// digest-then-hex shape of the teacher's `common::utils::content_hash`.
pub fn content_hash(bytes: &[u8]) -> String {
    let canonical = canonicalize(bytes);
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

/// One line-level change in a diff (§4.5: "a line-level change set", not a
/// unified-diff string, so an external UI can render it however it likes).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DiffOp {
    pub kind: DiffKind,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DiffKind {
    Equal,
    Insert,
    Delete,
}

#[derive(Clone)]
pub struct SnapshotStore {
    catalog: Catalog,
}

impl SnapshotStore {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Stores `bytes` as a Snapshot, deduplicating on content hash, and
    /// records that `(run_id, device_id)` produced it.
    pub async fn capture(&self, run_id: JobRunId, device_id: DeviceId, bytes: Vec<u8>) -> Result<Snapshot> {
        let hash = content_hash(&bytes);
        let snapshot = Snapshot::builder().content_hash(hash).bytes(bytes).build();
        let stored = self.catalog.put_snapshot(&snapshot).await?;
        self.catalog.add_snapshot_reference(run_id, device_id, stored.id).await?;
        Ok(stored)
    }

    pub async fn get(&self, id: SnapshotId) -> Result<Snapshot> {
        self.catalog.get_snapshot(id).await
    }

    pub async fn history_for_device(&self, device_id: DeviceId) -> Result<Vec<Snapshot>> {
        self.catalog.snapshot_history_for_device(device_id).await
    }

    /// §4.5: "the store guarantees the two snapshots belonged to the same
    /// device at some point (enforced at reference creation)." Both ids
    /// must appear somewhere in `device_id`'s own history, or the caller is
    /// trying to diff unrelated devices' configurations.
    pub async fn diff(
        &self,
        device_id: DeviceId,
        old_snapshot_id: SnapshotId,
        new_snapshot_id: SnapshotId,
    ) -> Result<Vec<DiffOp>> {
        let history = self.catalog.snapshot_history_for_device(device_id).await?;
        let known: std::collections::HashSet<SnapshotId> = history.iter().map(|s| s.id).collect();
        if !known.contains(&old_snapshot_id) || !known.contains(&new_snapshot_id) {
            return Err(NetRavenError::Validation(
                "both snapshots must belong to this device's history to diff them".to_string(),
            ));
        }

        let old = self.catalog.get_snapshot(old_snapshot_id).await?;
        let new = self.catalog.get_snapshot(new_snapshot_id).await?;
        Ok(diff_bytes(&old.bytes, &new.bytes))
    }
}

/// Pure, deterministic line-level diff (§4.5: "Diff is pure and
/// deterministic given the bytes").
fn diff_bytes(old: &[u8], new: &[u8]) -> Vec<DiffOp> {
    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(&old_text, &new_text);

    diff.iter_all_changes()
        .map(|change| {
            let kind = match change.tag() {
                ChangeTag::Equal => DiffKind::Equal,
                ChangeTag::Insert => DiffKind::Insert,
                ChangeTag::Delete => DiffKind::Delete,
            };
            DiffOp { kind, line: change.value().trim_end_matches('\n').to_string() }
        })
        .collect()
}
