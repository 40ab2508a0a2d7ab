//! C4 Worker Pool (§4.3): claims Job Runs off the durable queue and drives
//! them to a terminal status. Structured directly after the teacher's
//! `JobWorker::run` (`kernel/jobs/worker.rs`): a poll/claim loop per worker,
//! fan-out onto per-unit-of-work `tokio::spawn`ed tasks bounded by a
//! `tokio::sync::Semaphore`, collected with `futures::future::join_all`,
//! each task racing a `tokio_util::sync::CancellationToken` child token
//! against its own work — generalized from "one future per claimed job" to
//! "one future per device within one claimed Job Run."

mod commands;

pub use commands::commands_for_job;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::device::{self, RetryPolicy, SessionTimeouts};
use crate::entities::{
    DeviceSubResult, JobKind, JobRunStatus, LogEntry, LogLevel, LogSource, ReachabilityStatus,
};
use crate::error::{DeviceErrorKind, NetRavenError, Result};
use crate::id::{DeviceId, JobRunId};
use crate::logstore::{LogSink, TranscriptRecord, TranscriptWriter};
use crate::redaction::{RedactionStrategy, Redactor};
use crate::resolver::CredentialResolver;
use crate::services::Services;
use crate::snapshot::SnapshotStore;

/// §4.3 step 6: "failed_error if the worker itself faulted (DB loss, vault
/// loss, panic caught)." Catalog/vault errors surfacing out of a device task
/// are the worker's own infrastructure failing, not a device rejecting the
/// attempt — a `NotFound`/`Conflict`/`Validation` error, by contrast, means
/// the catalog answered fine and the data just isn't there.
fn is_infra_error(e: &NetRavenError) -> bool {
    matches!(e, NetRavenError::Database(_) | NetRavenError::CatalogLoss(_) | NetRavenError::VaultError(_))
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// N: number of independent poll/claim loops per process.
    pub worker_count: u32,
    /// K: max concurrent device sessions fanned out per Job Run.
    pub device_fanout: usize,
    /// Per-Job-Run wall-clock ceiling from enqueue time (§5).
    pub job_max_duration: Duration,
    /// Invisibility window granted to a claimed queue item.
    pub claim_visibility: Duration,
    /// How long an idle worker sleeps between empty claims.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            device_fanout: 8,
            job_max_duration: Duration::from_secs(1800),
            claim_visibility: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_config(cfg: &crate::config::NetRavenConfig) -> Self {
        Self {
            worker_count: cfg.worker_concurrency,
            device_fanout: cfg.device_fanout as usize,
            job_max_duration: cfg.job_max_duration,
            retry: RetryPolicy {
                max_retries: cfg.retry_max,
                base_delay: cfg.retry_base_delay,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

/// Every field is a cheap handle clone (pool, channel sender, or a struct
/// wrapping one), so the whole pool is `Clone` and each spawned loop or
/// device task just gets its own copy rather than sharing one behind `Arc`.
#[derive(Clone)]
pub struct WorkerPool {
    services: Services,
    resolver: CredentialResolver,
    snapshots: SnapshotStore,
    transcripts: Arc<TranscriptWriter>,
    redactor: Arc<Redactor>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(
        services: Services,
        transcripts: Arc<TranscriptWriter>,
        redactor: Arc<Redactor>,
        config: WorkerPoolConfig,
    ) -> Self {
        let resolver = CredentialResolver::new(services.catalog.clone());
        let snapshots = SnapshotStore::new(services.catalog.clone());
        Self { services, resolver, snapshots, transcripts, redactor, config }
    }

    /// Redacts free-text (device output, error messages) the same way the
    /// log store does before anything persists it (§4.7: "mandatory
    /// redaction"), honoring the same operator-configured patterns.
    fn redact(&self, text: &str) -> String {
        self.redactor.redact(text, RedactionStrategy::TokenReplacement)
    }

    /// Runs `worker_count` independent claim loops until `shutdown` is
    /// cancelled, then waits for every in-flight Job Run to either finish or
    /// observe cancellation.
    pub async fn run(self, shutdown: CancellationToken) {
        let pool_id = Uuid::new_v4();
        let handles: Vec<_> = (0..self.config.worker_count)
            .map(|i| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                let worker_id = format!("worker-{pool_id}-{i}");
                tokio::spawn(async move { pool.run_loop(worker_id, shutdown).await })
            })
            .collect();
        join_all(handles).await;
    }

    async fn run_loop(self, worker_id: String, shutdown: CancellationToken) {
        info!(worker_id = %worker_id, "worker loop starting");
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.services.queue.claim(&worker_id, self.config.claim_visibility).await {
                Ok(Some(item)) => {
                    let run_token = shutdown.child_token();
                    match self.process_claimed(item.run_id, run_token).await {
                        Ok(()) => {
                            if let Err(e) = self.services.queue.ack(item.run_id).await {
                                error!(run_id = %item.run_id, error = %e, "failed to ack completed job run");
                            }
                        }
                        Err(e) => {
                            error!(run_id = %item.run_id, error = %e, "job run processing failed");
                            let _ = self
                                .services
                                .queue
                                .nack(item.run_id, &e.to_string(), self.config.retry.base_delay)
                                .await;
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "failed to claim queue item");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        info!(worker_id = %worker_id, "worker loop stopped");
    }

    /// §4.3 steps 2-7, plus the idempotence guard in step "Idempotence."
    async fn process_claimed(&self, run_id: JobRunId, shutdown: CancellationToken) -> Result<()> {
        let run = self.services.catalog.get_job_run(run_id).await?;
        if run.status.is_terminal() {
            // At-least-once delivery after a crash before `ack`; nothing left to do.
            return Ok(());
        }

        let job = self.services.catalog.get_job(run.job_id).await?;
        self.services.catalog.transition_job_run(run_id, JobRunStatus::Running).await?;
        self.services.log_sink.submit(
            LogEntry::builder()
                .level(LogLevel::Info)
                .source(LogSource::Job)
                .job_run_id(run_id)
                .message(format!("job run started against {} device(s)", run.resolved_devices.len()))
                .build(),
        );

        if run.resolved_devices.is_empty() {
            self.services.catalog.transition_job_run(run_id, JobRunStatus::NoDevices).await?;
            return Ok(());
        }

        let commands = Arc::new(commands_for_job(&job));
        let deadline = run.created_at
            + chrono::Duration::from_std(self.config.job_max_duration).unwrap_or(chrono::Duration::seconds(1800));

        let run_token = shutdown.child_token();
        let watchdog = self.spawn_deadline_watchdog(run_id, deadline, run_token.clone());

        let semaphore = Arc::new(Semaphore::new(self.config.device_fanout));
        let mut handles = Vec::with_capacity(run.resolved_devices.len());
        for device_id in run.resolved_devices.clone() {
            let semaphore = semaphore.clone();
            let commands = commands.clone();
            let token = run_token.child_token();
            let job_kind = job.kind;
            let worker = self.clone();
            handles.push((device_id, tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                tokio::select! {
                    outcome = worker.run_device(run_id, job_kind, &commands, device_id) => outcome,
                    // Deadline/explicit cancellation is a device-level
                    // outcome (§5), not a worker fault, so it carries no
                    // infra-fault signal.
                    _ = token.cancelled() => (DeviceSubResult::builder()
                        .run_id(run_id)
                        .device_id(device_id)
                        .status(DeviceErrorKind::Aborted)
                        .error_message("job run deadline exceeded or cancelled".to_string())
                        .build(), false),
                }
            })));
        }

        let (device_ids, join_handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(join_handles).await;
        run_token.cancel();
        let _ = watchdog.await;

        let mut sub_results = Vec::with_capacity(results.len());
        let mut infra_fault = false;
        for (device_id, result) in device_ids.into_iter().zip(results) {
            match result {
                Ok((sub_result, fault)) => {
                    infra_fault |= fault;
                    sub_results.push(sub_result);
                }
                Err(join_err) => {
                    // §4.3 step 6: "failed_error if the worker itself
                    // faulted (DB loss, vault loss, panic caught)." A
                    // panicked device task still needs a sub-result, or
                    // `finalize` would silently aggregate as if that device
                    // never ran — but unlike deadline cancellation this
                    // counts as an infrastructure fault, not a device-level
                    // one.
                    warn!(run_id = %run_id, device_id = %device_id, error = %join_err, "device task panicked");
                    infra_fault = true;
                    sub_results.push(
                        DeviceSubResult::builder()
                            .run_id(run_id)
                            .device_id(device_id)
                            .status(DeviceErrorKind::Aborted)
                            .error_message(format!("worker task panicked: {join_err}"))
                            .build(),
                    );
                }
            }
        }

        self.finalize(run_id, run.cancel_requested, infra_fault, sub_results).await
    }

    /// Races `deadline` against explicit API cancellation
    /// (`cancel_requested`), cancelling `run_token` on whichever comes
    /// first — the single mechanism that drives every device task's child
    /// token cooperatively, per §5's deadline and explicit-cancellation
    /// rules.
    fn spawn_deadline_watchdog(
        &self,
        run_id: JobRunId,
        deadline: chrono::DateTime<chrono::Utc>,
        run_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let catalog = self.services.catalog.clone();
        tokio::spawn(async move {
            loop {
                let now = chrono::Utc::now();
                if now >= deadline {
                    run_token.cancel();
                    return;
                }
                let remaining = (deadline - now).to_std().unwrap_or(Duration::from_millis(1));
                let check_interval = remaining.min(Duration::from_secs(2));

                tokio::select! {
                    _ = run_token.cancelled() => return,
                    _ = tokio::time::sleep(check_interval) => {}
                }

                if matches!(catalog.is_cancellation_requested(run_id).await, Ok(true)) {
                    run_token.cancel();
                    return;
                }
            }
        })
    }

    /// One device's full attempt sequence: resolve credentials, try each in
    /// ranked order (falling back only on `auth_failure`), emitting its own
    /// session log (source=`session`) + transcript per attempt (§4.4: "every
    /// session emits a Connection log"), then capture a snapshot for backup
    /// jobs and refresh reachability from the final attempt. Returns whether
    /// any attempt along the way hit an infrastructure fault rather than a
    /// device-level rejection.
    async fn run_device(
        &self,
        run_id: JobRunId,
        job_kind: JobKind,
        commands: &[String],
        device_id: DeviceId,
    ) -> (DeviceSubResult, bool) {
        let started_at = chrono::Utc::now();

        let device = match self.services.catalog.get_device(device_id).await {
            Ok(d) => d,
            Err(e) => {
                let infra_fault = is_infra_error(&e);
                return (
                    DeviceSubResult::builder()
                        .run_id(run_id)
                        .device_id(device_id)
                        .status(DeviceErrorKind::ProtocolError)
                        .error_message(format!("device lookup failed: {e}"))
                        .build(),
                    infra_fault,
                );
            }
        };

        let candidates = match self.resolver.candidates_for_device(device_id).await {
            Ok(c) => c,
            Err(e) => {
                let infra_fault = is_infra_error(&e);
                return (
                    DeviceSubResult::builder()
                        .run_id(run_id)
                        .device_id(device_id)
                        .status(DeviceErrorKind::ProtocolError)
                        .error_message(format!("credential resolution failed: {e}"))
                        .build(),
                    infra_fault,
                );
            }
        };

        if candidates.is_empty() {
            return (
                DeviceSubResult::builder()
                    .run_id(run_id)
                    .device_id(device_id)
                    .status(DeviceErrorKind::AuthFailure)
                    .error_message("no credentials available for device".to_string())
                    .build(),
                false,
            );
        }

        let timeouts = SessionTimeouts::default();
        let mut outcome = None;
        let mut used_credential = None;
        let mut infra_fault = false;

        for ranked in &candidates {
            let credential = &ranked.credential;
            let attempt_started = chrono::Utc::now();

            let attempt = match self.services.vault.open(&credential.secret_ciphertext, credential.encryption_key_id) {
                Ok(plaintext) => {
                    device::run_attempt(&device, credential, &plaintext, commands, timeouts, &self.config.retry).await
                }
                Err(e) => {
                    // A vault fault is the worker's own infrastructure
                    // failing, not this device rejecting the attempt.
                    infra_fault = true;
                    device::AttemptOutcome::failure(DeviceErrorKind::ProtocolError, format!("vault open failed: {e}"))
                }
            };
            let attempt_ended = chrono::Utc::now();

            record_session_attempt(
                &self.services.log_sink,
                &self.transcripts,
                &self.redactor,
                run_id,
                device_id,
                commands,
                attempt_started,
                attempt_ended,
                &attempt,
            )
            .await;

            let _ = self.resolver.record_outcome(credential.id, attempt.status).await;
            used_credential = Some(credential.id);

            let is_auth_failure = attempt.status == DeviceErrorKind::AuthFailure;
            outcome = Some(attempt);
            if !is_auth_failure {
                break;
            }
        }

        let outcome = outcome.expect("candidates non-empty implies at least one attempt");
        let sub_result = self
            .finalize_device_outcome(run_id, job_kind, device_id, started_at, used_credential, outcome)
            .await;
        (sub_result, infra_fault)
    }

    /// Builds the run's device Sub-Result from the final credential
    /// attempt's outcome, refreshing reachability and capturing a backup
    /// snapshot. Session logging itself already happened per-attempt in
    /// `run_device`, so this only aggregates.
    async fn finalize_device_outcome(
        &self,
        run_id: JobRunId,
        job_kind: JobKind,
        device_id: DeviceId,
        started_at: chrono::DateTime<chrono::Utc>,
        used_credential: Option<crate::id::CredentialId>,
        outcome: device::AttemptOutcome,
    ) -> DeviceSubResult {
        let duration_ms = (chrono::Utc::now() - started_at).num_milliseconds();
        let redacted_error = outcome.error_message.as_deref().map(|s| self.redact(s));

        // §3 Reachability: refreshed by the reachability job, and by any
        // successful session regardless of job kind.
        if outcome.status.is_success() {
            let _ = self.services.catalog.update_device_reachability(device_id, ReachabilityStatus::Reachable, None).await;
        } else if job_kind == JobKind::Reachability {
            let status = if outcome.status == DeviceErrorKind::Unreachable {
                ReachabilityStatus::Unreachable
            } else {
                ReachabilityStatus::Unknown
            };
            let _ = self.services.catalog.update_device_reachability(device_id, status, redacted_error.clone()).await;
        }

        let mut sub_result = DeviceSubResult::builder()
            .run_id(run_id)
            .device_id(device_id)
            .status(outcome.status)
            .duration_ms(duration_ms)
            .build();
        sub_result.credential_id = used_credential;
        sub_result.error_message = redacted_error;

        if job_kind == JobKind::Backup && outcome.status.is_success() {
            if let Some(output) = &outcome.output {
                match self.snapshots.capture(run_id, device_id, output.clone().into_bytes()).await {
                    Ok(snapshot) => sub_result.snapshot_id = Some(snapshot.id),
                    Err(e) => warn!(run_id = %run_id, device_id = %device_id, error = %e, "failed to store snapshot"),
                }
            }
        }

        sub_result
    }

    /// §4.3 step 6-7: aggregate, persist the last Sub-Result atomically
    /// with the terminal transition (§5: "sub-result write + terminal
    /// status" is one unit), upserting the rest individually. `infra_fault`
    /// (set by `run_device`/a panicked device task) takes priority over a
    /// plain device-level failure: the worker itself faulted, not just the
    /// devices it was talking to.
    async fn finalize(
        &self,
        run_id: JobRunId,
        cancel_requested: bool,
        infra_fault: bool,
        sub_results: Vec<DeviceSubResult>,
    ) -> Result<()> {
        let final_status = if cancel_requested {
            JobRunStatus::Cancelled
        } else if infra_fault {
            JobRunStatus::FailedError
        } else if sub_results.iter().all(|r| r.status.is_success()) {
            JobRunStatus::CompletedSuccess
        } else {
            JobRunStatus::CompletedFailed
        };

        let Some((last, rest)) = sub_results.split_last() else {
            return self.services.catalog.transition_job_run(run_id, final_status).await.map(|_| ());
        };

        for sub_result in rest {
            self.services.catalog.upsert_sub_result(sub_result).await?;
        }
        self.services.catalog.finish_job_run_with_sub_result(run_id, final_status, last).await?;

        self.services.log_sink.submit(
            LogEntry::builder()
                .level(LogLevel::Info)
                .source(LogSource::Job)
                .job_run_id(run_id)
                .message(format!("job run finished: {final_status:?}"))
                .build(),
        );
        Ok(())
    }
}

/// Emits one session's Connection log (§4.4: "every session emits a
/// Connection log (C8, source=`session`)") and NDJSON transcript record.
/// Free function rather than a `WorkerPool` method so it only depends on the
/// three DB-free collaborators a session actually touches, making it
/// reachable from tests without a `Catalog`.
#[allow(clippy::too_many_arguments)]
async fn record_session_attempt(
    log_sink: &LogSink,
    transcripts: &TranscriptWriter,
    redactor: &Redactor,
    run_id: JobRunId,
    device_id: DeviceId,
    commands: &[String],
    started_at: chrono::DateTime<chrono::Utc>,
    ended_at: chrono::DateTime<chrono::Utc>,
    outcome: &device::AttemptOutcome,
) {
    let duration_ms = (ended_at - started_at).num_milliseconds();
    let redacted_output =
        outcome.output.as_deref().map(|s| redactor.redact(s, RedactionStrategy::TokenReplacement)).unwrap_or_default();

    log_sink.submit(
        LogEntry::builder()
            .level(if outcome.status.is_success() { LogLevel::Info } else { LogLevel::Warning })
            .source(LogSource::Session)
            .job_run_id(run_id)
            .device_id(device_id)
            .message(format!("device session finished: {}", outcome.status))
            .build(),
    );

    if let Err(e) = transcripts
        .write(&TranscriptRecord {
            session_id: Uuid::new_v4(),
            device_id,
            started_at,
            ended_at,
            duration_ms,
            commands,
            redacted_output: &redacted_output,
        })
        .await
    {
        warn!(run_id = %run_id, device_id = %device_id, error = %e, "failed to write session transcript");
    }
}
