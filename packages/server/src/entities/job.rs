//! Job (§3): a named, schedulable unit of work against a device selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::{DeviceId, JobId, TagId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
pub enum JobKind {
    Backup,
    Reachability,
    Command,
    Custom,
}

/// Which devices a Job targets. The union variant lets an operator combine
/// an explicit device with a tag-wide sweep in one Job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobSelector {
    Device(DeviceId),
    Tag(TagId),
    Union(Vec<JobSelector>),
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = JobId::new())]
    pub id: JobId,

    pub name: String,
    pub kind: JobKind,

    /// Serialized `JobSelector` (stored as jsonb; see `catalog::job`).
    pub selector: serde_json::Value,

    /// Opaque parameter bag interpreted by the job kind's handler.
    #[builder(default = serde_json::Value::Null)]
    pub params: serde_json::Value,

    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default = false)]
    pub is_system_job: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// §3 invariant: "a disabled Job MUST NOT produce Job Runs."
    pub fn may_produce_runs(&self) -> bool {
        self.enabled
    }
}

impl JobSelector {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("JobSelector always serializes")
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_job_may_not_produce_runs() {
        let mut job = Job::builder()
            .name("nightly backup")
            .kind(JobKind::Backup)
            .selector(JobSelector::Tag(TagId::new()).to_json())
            .build();
        assert!(job.may_produce_runs());
        job.enabled = false;
        assert!(!job.may_produce_runs());
    }

    #[test]
    fn selector_roundtrips_through_json() {
        let selector = JobSelector::Union(vec![
            JobSelector::Device(DeviceId::new()),
            JobSelector::Tag(TagId::new()),
        ]);
        let json = selector.to_json();
        let parsed = JobSelector::from_json(&json).unwrap();
        match parsed {
            JobSelector::Union(members) => assert_eq!(members.len(), 2),
            _ => panic!("expected Union"),
        }
    }
}
