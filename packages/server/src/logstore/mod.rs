//! C8 Structured Log Store (§4.7): a non-blocking append path in front of
//! `catalog::log_entry`, mandatory redaction, retention pruning, and a
//! rotated NDJSON transcript writer for raw session output.
//!
//! Writers never touch Postgres directly on the hot path — they push onto a
//! bounded `tokio::sync::mpsc` channel; one writer task owns the receiver
//! and drains it, the same single-writer-task shape as the teacher's
//! `scheduled_tasks.rs` background-task loop, generalized from "one cron
//! tick does the work" to "one task owns all writes."

mod transcript;

pub use transcript::{TranscriptRecord, TranscriptWriter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::catalog::Catalog;
use crate::entities::{LogEntry, LogLevel, LogSource};
use crate::error::Result;
use crate::redaction::{RedactionStrategy, Redactor};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Counts entries dropped for ring overflow (§4.7: "record a single
/// `log_drop` counter increment"). Exposed so the operational `tracing`
/// layer (not this store) can report it as a metric.
#[derive(Debug, Default)]
pub struct LogStoreStats {
    pub dropped: AtomicU64,
}

/// Handle callers clone to submit entries; cheap, just a channel sender.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogEntry>,
    stats: Arc<LogStoreStats>,
    redactor: Arc<Redactor>,
}

impl LogSink {
    /// Redacts `message` and submits the entry. Redaction is mandatory for
    /// `info` and above (§4.7); applied unconditionally here since a
    /// `debug` entry that goes unredacted because it might later be dropped
    /// anyway is not a risk worth the special case.
    pub fn submit(&self, mut entry: LogEntry) {
        let findings = self.redactor.detect(&entry.message);
        if !findings.is_empty() {
            entry.message = crate::redaction::redact_pii(&entry.message, &findings, RedactionStrategy::TokenReplacement);
        }

        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                // §4.7: "on ring overflow the writer MUST drop the oldest
                // debug-level entries first." We can't reach into the
                // channel to evict an already-queued item, so the
                // overflowing entry itself is dropped if it's debug-level;
                // anything more severe is worth blocking briefly for.
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if entry.level != LogLevel::Debug {
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(entry).await;
                    });
                } else {
                    warn!("log store ring full, dropping debug entry");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("log store writer task is gone, entry lost");
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// DB-free sink/receiver pair for tests that need to observe submitted
    /// entries directly, without a `Catalog` draining them into Postgres.
    #[cfg(test)]
    pub(crate) fn for_test() -> (Self, mpsc::Receiver<LogEntry>) {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        (Self { tx, stats: Arc::new(LogStoreStats::default()), redactor: Arc::new(Redactor::default()) }, rx)
    }
}

/// Owns the receiving end; `run` is the single writer task's body.
pub struct LogWriter {
    catalog: Catalog,
    rx: mpsc::Receiver<LogEntry>,
}

impl LogWriter {
    /// Builds a connected sink/writer pair with the default channel
    /// capacity. `redactor` carries any operator-configured patterns
    /// alongside the built-in detectors.
    pub fn new(catalog: Catalog, redactor: Arc<Redactor>) -> (LogSink, Self) {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let stats = Arc::new(LogStoreStats::default());
        (LogSink { tx, stats, redactor }, Self { catalog, rx })
    }

    /// Drains entries until every sender has dropped, persisting each one.
    /// A single insert failure is logged and does not stop the drain — one
    /// bad row must not wedge every subsequent entry.
    pub async fn run(mut self) {
        while let Some(entry) = self.rx.recv().await {
            if let Err(e) = self.catalog.insert_log_entry(&entry).await {
                error!(error = %e, "failed to persist log entry");
            }
        }
    }
}

/// Periodic retention sweep (§4.7: "per-source TTL, default 30d; session
/// logs default 14d"). Intended to be driven by a ticker in `bin/worker.rs`,
/// not called per-entry.
pub async fn prune_expired(
    catalog: &Catalog,
    default_retention_days: u32,
    session_retention_days: u32,
) -> Result<u64> {
    let now = chrono::Utc::now();
    let mut total = 0u64;

    for source in [LogSource::Job, LogSource::System, LogSource::Connection] {
        let cutoff = now - chrono::Duration::days(default_retention_days as i64);
        total += catalog.prune_log_entries(source, cutoff).await?;
    }

    let session_cutoff = now - chrono::Duration::days(session_retention_days as i64);
    total += catalog.prune_log_entries(LogSource::Session, session_cutoff).await?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_redacts_secrets_before_queuing() {
        let (tx, mut rx) = mpsc::channel(8);
        let stats = Arc::new(LogStoreStats::default());
        let sink = LogSink { tx, stats, redactor: Arc::new(Redactor::default()) };

        let entry = LogEntry::builder()
            .level(LogLevel::Info)
            .source(LogSource::Session)
            .message("enable secret 5 $1$abc$xyzxyzxyz".to_string())
            .build();
        sink.submit(entry);

        let received = rx.recv().await.unwrap();
        assert!(!received.message.contains("$1$abc$xyzxyzxyz"));
        assert!(received.message.contains("[SECRET]"));
    }

    #[tokio::test]
    async fn full_channel_drops_debug_entries_and_counts_them() {
        let (tx, rx) = mpsc::channel(1);
        let stats = Arc::new(LogStoreStats::default());
        let sink = LogSink { tx, stats, redactor: Arc::new(Redactor::default()) };

        // Fill the one slot.
        sink.submit(LogEntry::builder().level(LogLevel::Info).source(LogSource::System).message("first").build());
        // This one should be dropped since the channel is full and it's debug.
        sink.submit(LogEntry::builder().level(LogLevel::Debug).source(LogSource::System).message("second").build());

        assert_eq!(sink.dropped_count(), 1);
        drop(rx);
    }
}
