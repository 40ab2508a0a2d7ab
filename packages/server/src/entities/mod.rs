//! The catalog's data model (§3): the typed records persisted by [`crate::catalog`].

pub mod credential;
pub mod device;
pub mod encryption_key;
pub mod job;
pub mod job_run;
pub mod log_entry;
pub mod schedule;
pub mod snapshot;
pub mod sub_result;
pub mod tag;

pub use credential::{Credential, CredentialTagBinding};
pub use device::{Device, Reachability, ReachabilityStatus, TransportKind};
pub use encryption_key::EncryptionKey;
pub use job::{Job, JobKind, JobSelector};
pub use job_run::{JobRun, JobRunStatus};
pub use log_entry::{LogEntry, LogLevel, LogSource};
pub use schedule::{DayOfWeek, Schedule, ScheduleKind};
pub use snapshot::Snapshot;
pub use sub_result::DeviceSubResult;
pub use tag::Tag;
