//! C2 Recurring Dispatcher (§4.1): the single-instance service that turns
//! due Schedules into queued Job Runs. Structured after the teacher's
//! `JobWorker` run loop (`kernel/jobs/worker.rs`) — a `run(shutdown)` tick
//! loop guarded by a `CancellationToken` — generalized from "claim and
//! execute a job" to "claim the dispatcher seat, then fire due schedules."

mod next_fire;

pub use next_fire::next_fire_after;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::entities::{JobRun, LogEntry, LogLevel, LogSource};
use crate::error::Result;

/// How long a held lease remains valid without renewal; renewed every tick.
const LEASE_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    pub holder_id: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            holder_id: format!("dispatcher-{}", Uuid::new_v4()),
        }
    }
}

pub struct Dispatcher {
    catalog: Catalog,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(catalog: Catalog, config: DispatcherConfig) -> Self {
        Self { catalog, config }
    }

    /// Runs the dispatcher until `shutdown` is cancelled. Every tick: renew
    /// (or attempt to acquire) the lease; if held, scan and fire due
    /// schedules; sleep until the next tick or shutdown, whichever comes
    /// first.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(holder_id = %self.config.holder_id, "dispatcher starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let expires_at = chrono::Utc::now() + chrono::Duration::from_std(LEASE_DURATION).unwrap();
            match self.catalog.claim_dispatcher_lease(&self.config.holder_id, expires_at).await {
                Ok(true) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "dispatcher tick failed");
                    }
                }
                Ok(false) => {
                    // Another instance holds the lease; idle this tick.
                }
                Err(e) => {
                    error!(error = %e, "failed to claim dispatcher lease");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }

        let _ = self.catalog.release_dispatcher_lease(&self.config.holder_id).await;
        info!(holder_id = %self.config.holder_id, "dispatcher stopped");
        Ok(())
    }

    /// One scan-and-fire pass. §4.1: "scans Schedules whose next-fire ≤
    /// now, in ascending next-fire order. For each due schedule: create a
    /// Job Run in status queued, enqueue it onto C3, then atomically
    /// advance next-fire."
    async fn tick(&self) -> Result<()> {
        let now = chrono::Utc::now();
        let mut tx = self.catalog.begin().await?;
        let due = self.catalog.due_schedules(&mut tx, now).await?;

        for schedule in due {
            let kind = match schedule.kind() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "unparseable schedule kind, skipping");
                    continue;
                }
            };

            // §4.1: "MUST NOT burst-fire missed occurrences." Detect that
            // at least one occurrence between the schedule's last recorded
            // fire and now was skipped, and log it once per tick rather
            // than once per skipped occurrence.
            if let Some(missed_point) = next_fire_after(&kind, schedule.tz(), schedule.next_fire_at) {
                if missed_point < now {
                    log_missed_schedule(&self.catalog, schedule.id).await?;
                }
            }

            let job = self.catalog.get_job(schedule.job_id).await?;
            if !job.may_produce_runs() {
                // Disabled job: advance past this fire without producing a
                // run (§3 invariant: "a disabled Job MUST NOT produce Job
                // Runs"), otherwise it would fire every tick forever.
                if let Some(next) = next_fire_after(&kind, schedule.tz(), now) {
                    self.catalog.advance_schedule(&mut tx, schedule.id, now, next).await?;
                }
                continue;
            }

            let devices = self.resolve_selector(&job).await?;
            let run = JobRun::builder().job_id(job.id).resolved_devices(devices).build();

            // §5: enqueue and next-fire advance share `tx`, so they commit
            // or roll back together — a crash between the two can never
            // duplicate or drop a fire.
            match self.catalog.enqueue_job_run_tx(&mut tx, &run, 0).await {
                Ok(_) => {
                    let next = next_fire_after(&kind, schedule.tz(), now);
                    match next {
                        Some(next) => {
                            self.catalog.advance_schedule(&mut tx, schedule.id, now, next).await?;
                        }
                        None => {
                            // `once` schedules have no further fire; the
                            // caller disables by setting next_fire_at far in
                            // the future rather than deleting the row.
                            self.catalog
                                .advance_schedule(&mut tx, schedule.id, now, now + chrono::Duration::days(3650))
                                .await?;
                        }
                    }
                }
                Err(e) => {
                    // §4.1 failure semantics: "if C3 enqueue fails, the Job
                    // Run record is deleted and next-fire is not advanced;
                    // retried on the next tick." Since both writes share
                    // `tx`, a failed insert here leaves nothing to roll back
                    // by hand: the whole tick's transaction aborts below and
                    // this schedule is retried next tick by construction.
                    error!(schedule_id = %schedule.id, error = %e, "failed to enqueue due schedule");
                    return Err(e);
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn resolve_selector(&self, job: &crate::entities::Job) -> Result<Vec<crate::id::DeviceId>> {
        let selector = crate::entities::JobSelector::from_json(&job.selector)
            .map_err(|e| crate::error::NetRavenError::Internal(format!("bad job selector: {e}")))?;
        let mut devices = self.resolve_selector_inner(&selector).await?;
        devices.sort();
        devices.dedup();
        if devices.is_empty() {
            let entry = LogEntry::builder()
                .level(LogLevel::Warning)
                .source(LogSource::Job)
                .message(format!("job {} resolved to zero devices", job.id))
                .build();
            self.catalog.insert_log_entry(&entry).await?;
        }
        Ok(devices)
    }

    fn resolve_selector_inner<'a>(
        &'a self,
        selector: &'a crate::entities::JobSelector,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<crate::id::DeviceId>>> + Send + 'a>> {
        use crate::entities::JobSelector;
        Box::pin(async move {
            match selector {
                JobSelector::Device(id) => Ok(vec![*id]),
                JobSelector::Tag(tag_id) => Ok(self
                    .catalog
                    .devices_for_tag(*tag_id)
                    .await?
                    .into_iter()
                    .map(|d| d.id)
                    .collect()),
                JobSelector::Union(members) => {
                    let mut all = Vec::new();
                    for member in members {
                        all.extend(self.resolve_selector_inner(member).await?);
                    }
                    Ok(all)
                }
            }
        })
    }
}

/// Marks a Schedule's run as `missed_schedule` in the log store rather than
/// burst-firing missed occurrences (§4.1: "it MUST NOT burst-fire missed
/// occurrences"). Exposed separately so `next_fire::next_fire_after`
/// callers (the dispatcher and its tests) can log the condition
/// consistently.
pub async fn log_missed_schedule(catalog: &Catalog, schedule_id: crate::id::ScheduleId) -> Result<()> {
    let entry = LogEntry::builder()
        .level(LogLevel::Warning)
        .source(LogSource::System)
        .message(format!("missed_schedule: schedule {schedule_id} fell behind, skipping to next occurrence"))
        .build();
    catalog.insert_log_entry(&entry).await?;
    Ok(())
}
