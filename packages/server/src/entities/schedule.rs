//! Recurring Schedule (§3), owned by a Job.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::id::{JobId, ScheduleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "day_of_week", rename_all = "snake_case")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => DayOfWeek::Monday,
            chrono::Weekday::Tue => DayOfWeek::Tuesday,
            chrono::Weekday::Wed => DayOfWeek::Wednesday,
            chrono::Weekday::Thu => DayOfWeek::Thursday,
            chrono::Weekday::Fri => DayOfWeek::Friday,
            chrono::Weekday::Sat => DayOfWeek::Saturday,
            chrono::Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// The schedule kind plus whatever fields that kind needs (§3). Modeled as
/// an enum rather than a sparse flat row so an `interval` schedule cannot
/// accidentally carry a `cron_expression`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Once,
    Interval { period_seconds: i64 },
    Daily { time_of_day: NaiveTime },
    Weekly { time_of_day: NaiveTime, days: Vec<DayOfWeek> },
    Cron { expression: String },
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Schedule {
    #[builder(default = ScheduleId::new())]
    pub id: ScheduleId,

    pub job_id: JobId,

    /// Serialized `ScheduleKind` (see `catalog::schedule`).
    pub kind: serde_json::Value,

    /// IANA timezone the `daily`/`weekly` wall-clock slots are evaluated
    /// in (e.g. `"America/Chicago"`). Unused for `interval`/`cron`.
    #[builder(default = "UTC".to_string())]
    pub timezone: String,

    /// Authoritative next-fire instant; always ≥ now at rest (§3 invariant).
    pub next_fire_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub last_fired_at: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn kind(&self) -> Result<ScheduleKind, serde_json::Error> {
        serde_json::from_value(self.kind.clone())
    }

    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

impl ScheduleKind {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("ScheduleKind always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_kind_roundtrips() {
        let kind = ScheduleKind::Interval { period_seconds: 3600 };
        let json = kind.to_json();
        let schedule = Schedule::builder()
            .job_id(JobId::new())
            .kind(json)
            .next_fire_at(Utc::now())
            .build();
        match schedule.kind().unwrap() {
            ScheduleKind::Interval { period_seconds } => assert_eq!(period_seconds, 3600),
            _ => panic!("expected Interval"),
        }
    }

    #[test]
    fn unparseable_timezone_falls_back_to_utc() {
        let schedule = Schedule::builder()
            .job_id(JobId::new())
            .kind(ScheduleKind::Once.to_json())
            .timezone("not-a-real-zone")
            .next_fire_at(Utc::now())
            .build();
        assert_eq!(schedule.tz(), chrono_tz::UTC);
    }
}
