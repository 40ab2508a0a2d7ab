//! Pure "what's the next fire instant" computation per Schedule kind
//! (§4.1 AMBIENT). Kept free of any catalog/IO dependency so it can be unit
//! tested without a database.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use crate::entities::{DayOfWeek, ScheduleKind};

/// Returns the next instant strictly after `after` that `kind` fires, or
/// `None` for a `once` schedule (it never fires again).
pub fn next_fire_after(kind: &ScheduleKind, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match kind {
        ScheduleKind::Once => None,
        ScheduleKind::Interval { period_seconds } => {
            Some(after + chrono::Duration::seconds((*period_seconds).max(1)))
        }
        ScheduleKind::Daily { time_of_day } => Some(next_daily(tz, after, &[], *time_of_day)),
        ScheduleKind::Weekly { time_of_day, days } => Some(next_daily(tz, after, days, *time_of_day)),
        ScheduleKind::Cron { expression } => next_cron(expression, after),
    }
}

/// Shared daily/weekly advance: finds the next local wall-clock slot at
/// `time_of_day` on or after `after`, restricted to `days` if non-empty
/// (empty means "every day", i.e. plain daily).
fn next_daily(
    tz: Tz,
    after: DateTime<Utc>,
    days: &[DayOfWeek],
    time_of_day: chrono::NaiveTime,
) -> DateTime<Utc> {
    let local_after = after.with_timezone(&tz);
    let mut candidate_date = local_after.date_naive();

    loop {
        let candidate_naive = candidate_date.and_time(time_of_day);
        let candidate_local = match tz.from_local_datetime(&candidate_naive).earliest() {
            Some(dt) => dt,
            None => {
                // Falls in a DST spring-forward gap; try the next day.
                candidate_date = candidate_date.succ_opt().unwrap_or(candidate_date);
                continue;
            }
        };

        let day_matches = days.is_empty() || days.contains(&DayOfWeek::from_chrono(candidate_date.weekday()));
        if day_matches && candidate_local > local_after {
            return candidate_local.with_timezone(&Utc);
        }
        candidate_date = candidate_date.succ_opt().unwrap_or(candidate_date);
    }
}

fn next_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = CronSchedule::from_str(expression).ok()?;
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn interval_advances_by_period() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = next_fire_after(&ScheduleKind::Interval { period_seconds: 3600 }, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, after + chrono::Duration::hours(1));
    }

    #[test]
    fn once_never_fires_again() {
        let after = Utc::now();
        assert!(next_fire_after(&ScheduleKind::Once, chrono_tz::UTC, after).is_none());
    }

    #[test]
    fn daily_advances_to_tomorrow_if_time_already_passed_today() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 23, 0, 0).unwrap();
        let time_of_day = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let next = next_fire_after(&ScheduleKind::Daily { time_of_day }, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn daily_fires_later_today_if_time_not_yet_passed() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        let time_of_day = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let next = next_fire_after(&ScheduleKind::Daily { time_of_day }, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekly_only_matches_listed_days() {
        // 2026-01-01 is a Thursday.
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let time_of_day = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let kind = ScheduleKind::Weekly { time_of_day, days: vec![DayOfWeek::Saturday] };
        let next = next_fire_after(&kind, chrono_tz::UTC, after).unwrap();
        assert_eq!(next.with_timezone(&chrono_tz::UTC).weekday(), chrono::Weekday::Sat);
    }

    #[test]
    fn cron_finds_next_matching_instant() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // Every hour on the hour.
        let kind = ScheduleKind::Cron { expression: "0 0 * * * *".to_string() };
        let next = next_fire_after(&kind, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn missed_cron_schedule_skips_to_next_without_bursting() {
        let long_ago = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let now = Utc::now();
        let kind = ScheduleKind::Cron { expression: "0 0 * * * *".to_string() };
        // Simulates a schedule whose next_fire_at fell far behind: asking
        // "what's next after now" must return one near-future instant, not
        // walk forward one occurrence at a time from `long_ago`.
        let next = next_fire_after(&kind, chrono_tz::UTC, now).unwrap();
        assert!(next > now);
        assert!(next - now < chrono::Duration::hours(2));
        let _ = long_ago;
    }
}
