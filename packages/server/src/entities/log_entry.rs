//! Log Entry (§3): a durable, redacted record in the structured log store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::{DeviceId, JobRunId, LogEntryId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "log_level", rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "log_source", rename_all = "snake_case")]
pub enum LogSource {
    Job,
    Session,
    System,
    Connection,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct LogEntry {
    #[builder(default = LogEntryId::new())]
    pub id: LogEntryId,

    #[builder(default = Utc::now())]
    pub ts: DateTime<Utc>,

    pub level: LogLevel,
    pub source: LogSource,

    #[builder(default, setter(strip_option))]
    pub job_run_id: Option<JobRunId>,
    #[builder(default, setter(strip_option))]
    pub device_id: Option<DeviceId>,

    pub message: String,

    /// Already redacted by the time it reaches this struct (§4.7: "mandatory,
    /// not bypassable for info and above").
    #[builder(default = serde_json::Value::Null)]
    pub meta: serde_json::Value,
}

impl LogEntry {
    /// §3: "Lifetime bounded by retention policy per source." Session logs
    /// get a shorter default window than everything else.
    pub fn retention_days(&self, default_days: u32, session_days: u32) -> u32 {
        match self.source {
            LogSource::Session => session_days,
            _ => default_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_logs_use_session_retention() {
        let entry = LogEntry::builder()
            .level(LogLevel::Info)
            .source(LogSource::Session)
            .message("session opened")
            .build();
        assert_eq!(entry.retention_days(90, 14), 14);
    }

    #[test]
    fn job_logs_use_default_retention() {
        let entry = LogEntry::builder()
            .level(LogLevel::Info)
            .source(LogSource::Job)
            .message("run started")
            .build();
        assert_eq!(entry.retention_days(90, 14), 90);
    }

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Critical > LogLevel::Error);
        assert!(LogLevel::Info >= LogLevel::Info);
    }
}
