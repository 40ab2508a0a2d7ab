//! Job Run (§3): one execution of a Job against a resolved device set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::{DeviceId, JobId, JobRunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_run_status", rename_all = "snake_case")]
pub enum JobRunStatus {
    #[default]
    Queued,
    Running,
    CompletedSuccess,
    CompletedFailed,
    FailedError,
    Cancelled,
    NoDevices,
}

impl JobRunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobRunStatus::Queued | JobRunStatus::Running)
    }

    /// §3 invariant: status is monotonic within
    /// `{queued} -> {running} -> {terminal}`; no backward transitions.
    pub fn can_transition_to(self, next: JobRunStatus) -> bool {
        use JobRunStatus::*;
        match (self, next) {
            (Queued, Running) | (Queued, Cancelled) => true,
            (Running, other) if other.is_terminal() => true,
            (same, other) => same == other,
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobRun {
    #[builder(default = JobRunId::new())]
    pub id: JobRunId,

    pub job_id: JobId,

    /// The resolved device set as of enqueue time, frozen so a later Tag
    /// membership change cannot retroactively change what this run covers.
    pub resolved_devices: Vec<DeviceId>,

    #[builder(default)]
    pub status: JobRunStatus,

    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,

    #[builder(default = false)]
    pub cancel_requested: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl JobRun {
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Attempts the transition, returning whether it was legal and applying
    /// it (plus the matching timestamp) only if so.
    pub fn transition_to(&mut self, next: JobRunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        if next == JobRunStatus::Running {
            self.started_at = Some(Utc::now());
        } else if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JobRun {
        JobRun::builder().job_id(JobId::new()).resolved_devices(vec![DeviceId::new()]).build()
    }

    #[test]
    fn status_cannot_regress_from_terminal() {
        let mut run = sample();
        assert!(run.transition_to(JobRunStatus::Running));
        assert!(run.transition_to(JobRunStatus::CompletedSuccess));
        assert!(!run.transition_to(JobRunStatus::Running));
    }

    #[test]
    fn duration_is_none_until_both_timestamps_set() {
        let mut run = sample();
        assert!(run.duration().is_none());
        run.transition_to(JobRunStatus::Running);
        assert!(run.duration().is_none());
        run.transition_to(JobRunStatus::CompletedSuccess);
        assert!(run.duration().is_some());
    }

    #[test]
    fn queued_can_be_cancelled_directly() {
        let mut run = sample();
        assert!(run.transition_to(JobRunStatus::Cancelled));
        assert!(run.status.is_terminal());
    }
}
