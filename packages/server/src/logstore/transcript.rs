//! Rotated NDJSON transcript files for device session logs (§4.4: "every
//! session emits a Connection log ... a redacted excerpt of output").
//! Distinct from the Postgres-backed Log Entry stream: transcripts are
//! bulkier and operators typically want them as files they can grep or ship
//! to an external log pipeline, compressed once rotated.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{NetRavenError, Result};

const DEFAULT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// One line of a session transcript file.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptRecord<'a> {
    pub session_id: uuid::Uuid,
    pub device_id: crate::id::DeviceId,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: i64,
    pub commands: &'a [String],
    /// Already passed through `crate::redaction` before reaching here.
    pub redacted_output: &'a str,
}

struct RotationState {
    file: std::fs::File,
    path: PathBuf,
    bytes_written: u64,
    opened_at: chrono::DateTime<chrono::Utc>,
}

/// Appends NDJSON records to `log_dir`, rotating (and gzip-compressing the
/// rotated-out file) by size or age, whichever comes first.
pub struct TranscriptWriter {
    log_dir: PathBuf,
    max_bytes: u64,
    max_age: chrono::Duration,
    state: Mutex<Option<RotationState>>,
}

impl TranscriptWriter {
    pub fn new(log_dir: impl Into<PathBuf>, max_age: std::time::Duration) -> Self {
        Self {
            log_dir: log_dir.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            max_age: chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24)),
            state: Mutex::new(None),
        }
    }

    pub async fn write(&self, record: &TranscriptRecord<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| NetRavenError::Internal(e.to_string()))?;
        line.push(b'\n');

        let mut guard = self.state.lock().await;
        self.rotate_if_needed(&mut guard)?;
        let state = match guard.as_mut() {
            Some(state) => state,
            None => {
                *guard = Some(self.open_new_segment()?);
                guard.as_mut().expect("just inserted")
            }
        };

        state.file.write_all(&line)?;
        state.bytes_written += line.len() as u64;
        Ok(())
    }

    fn rotate_if_needed(&self, guard: &mut Option<RotationState>) -> Result<()> {
        let should_rotate = match guard.as_ref() {
            Some(state) => {
                state.bytes_written >= self.max_bytes || chrono::Utc::now() - state.opened_at >= self.max_age
            }
            None => false,
        };

        if should_rotate {
            if let Some(state) = guard.take() {
                compress_and_remove(&state.path)?;
            }
        }
        Ok(())
    }

    fn open_new_segment(&self) -> Result<RotationState> {
        std::fs::create_dir_all(&self.log_dir)?;
        let now = chrono::Utc::now();
        let filename = format!("sessions-{}.ndjson", now.format("%Y%m%dT%H%M%S%.fZ"));
        let path = self.log_dir.join(filename);
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(RotationState { file, path, bytes_written: 0, opened_at: now })
    }
}

/// Gzips a rotated-out segment in place and removes the uncompressed
/// original, leaving `<name>.ndjson.gz` behind.
fn compress_and_remove(path: &Path) -> Result<()> {
    let raw = std::fs::read(path)?;
    let compressed_path = path.with_extension("ndjson.gz");
    let output = std::fs::File::create(&compressed_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    encoder.write_all(&raw)?;
    encoder.finish()?;
    std::fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_ndjson_lines_to_log_dir() {
        let dir = std::env::temp_dir().join(format!("netraven-transcript-test-{}", uuid::Uuid::new_v4()));
        let writer = TranscriptWriter::new(&dir, std::time::Duration::from_secs(3600));

        let commands = vec!["show version".to_string()];
        let record = TranscriptRecord {
            session_id: uuid::Uuid::new_v4(),
            device_id: crate::id::DeviceId::new(),
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
            duration_ms: 120,
            commands: &commands,
            redacted_output: "Cisco IOS [REDACTED]",
        };

        writer.write(&record).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn rotates_and_compresses_once_max_bytes_exceeded() {
        let dir = std::env::temp_dir().join(format!("netraven-transcript-test-{}", uuid::Uuid::new_v4()));
        let mut writer = TranscriptWriter::new(&dir, std::time::Duration::from_secs(3600));
        writer.max_bytes = 1;

        let commands = vec!["show version".to_string()];
        let record = TranscriptRecord {
            session_id: uuid::Uuid::new_v4(),
            device_id: crate::id::DeviceId::new(),
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
            duration_ms: 120,
            commands: &commands,
            redacted_output: "first segment",
        };
        writer.write(&record).await.unwrap();
        writer.write(&record).await.unwrap();

        let gz_count = std::fs::read_dir(&dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map(|ext| ext == "gz").unwrap_or(false))
            .count();
        assert_eq!(gz_count, 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
