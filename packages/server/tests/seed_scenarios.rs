//! Integration tests against a real Postgres instance (testcontainers),
//! exercising the seeded scenarios from the job-run pipeline: snapshot
//! dedup, credential resolver ranking under real rows, schedule catch-up,
//! the durable queue's claim/nack/dead-letter lifecycle, and key rotation.
//!
//! Device I/O (SSH/Telnet/REST sessions) is out of scope here — those
//! adapters are exercised by their own unit tests in `device/`. These
//! scenarios drive the catalog, queue, resolver, snapshot store, and vault
//! directly, the same way a worker would between a claimed Job Run and its
//! terminal write.

mod common;

use std::time::Duration;

use chrono::Utc;
use netraven_core::dispatcher::next_fire_after;
use netraven_core::entities::{
    Credential, Device, DeviceSubResult, EncryptionKey, Job, JobKind, JobRun, JobRunStatus,
    JobSelector, Schedule, ScheduleKind, Tag, TransportKind,
};
use netraven_core::error::DeviceErrorKind;
use netraven_core::id::EncryptionKeyId;
use netraven_core::queue::Queue;
use netraven_core::resolver::CredentialResolver;
use netraven_core::snapshot::SnapshotStore;
use netraven_core::vault::Vault;

async fn seed_device_with_tag(catalog: &netraven_core::catalog::Catalog) -> (Device, Tag) {
    let tag = Tag::builder().name("core-routers").build();
    catalog.insert_tag(&tag).await.unwrap();

    let device = Device::builder()
        .hostname("r1")
        .host("192.0.2.1")
        .transport_kind(TransportKind::Ssh)
        .port(22)
        .owner_id(uuid::Uuid::new_v4())
        .build();
    catalog.insert_device(&device).await.unwrap();
    catalog.add_device_tag(device.id, tag.id).await.unwrap();

    (device, tag)
}

async fn seed_active_key(catalog: &netraven_core::catalog::Catalog) -> EncryptionKeyId {
    let key = EncryptionKey::builder().description("test key").build();
    catalog.insert_encryption_key(&key).await.unwrap();
    key.id
}

/// S1 (partial, catalog side) — a completed backup against one device
/// produces exactly one Snapshot, one Sub-Result referencing it, and a
/// terminal `completed_success` Job Run; the credential used has its
/// success counter incremented.
#[tokio::test]
async fn single_device_backup_happy_path() {
    let catalog = common::test_catalog().await;
    let (device, tag) = seed_device_with_tag(&catalog).await;
    let key_id = seed_active_key(&catalog).await;

    let credential = Credential::builder()
        .username("admin")
        .secret_ciphertext(vec![1, 2, 3])
        .encryption_key_id(key_id)
        .build();
    catalog.insert_credential(&credential).await.unwrap();
    catalog.bind_credential_to_tag(tag.id, credential.id, 0).await.unwrap();

    let job = Job::builder()
        .name("nightly backup")
        .kind(JobKind::Backup)
        .selector(JobSelector::Tag(tag.id).to_json())
        .build();
    catalog.insert_job(&job).await.unwrap();

    let run = JobRun::builder().job_id(job.id).resolved_devices(vec![device.id]).build();
    let run = catalog.enqueue_job_run(&run, 0).await.unwrap();
    assert_eq!(run.status, JobRunStatus::Queued);

    let resolver = CredentialResolver::new(catalog.clone());
    let candidates = resolver.candidates_for_device(device.id).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].credential.id, credential.id);

    let snapshots = SnapshotStore::new(catalog.clone());
    let config_bytes = b"hostname r1\ninterface Gi0/1\n no shutdown\n".to_vec();
    let snapshot = snapshots.capture(run.id, device.id, config_bytes).await.unwrap();

    let sub_result = DeviceSubResult::builder()
        .run_id(run.id)
        .device_id(device.id)
        .credential_id(credential.id)
        .status(DeviceErrorKind::Success)
        .snapshot_id(snapshot.id)
        .build();
    catalog
        .finish_job_run_with_sub_result(run.id, JobRunStatus::CompletedSuccess, &sub_result)
        .await
        .unwrap();
    resolver.record_outcome(credential.id, DeviceErrorKind::Success).await.unwrap();

    let finished = catalog.get_job_run(run.id).await.unwrap();
    assert_eq!(finished.status, JobRunStatus::CompletedSuccess);
    assert!(finished.finished_at.is_some());

    let sub_results = catalog.sub_results_for_run(run.id).await.unwrap();
    assert_eq!(sub_results.len(), 1);
    assert_eq!(sub_results[0].snapshot_id, Some(snapshot.id));

    let refreshed_credential = catalog.get_credential(credential.id).await.unwrap();
    assert_eq!(refreshed_credential.success_count, 1);
    assert_eq!(refreshed_credential.failure_count, 0);
}

/// S2 — a device with two credentials: the higher-priority one fails auth,
/// the lower-priority one succeeds. The resolver must rank the failed
/// credential first (ties aside, priority alone decides this), and outcome
/// recording must move each credential's counters independently.
#[tokio::test]
async fn credential_fallback_updates_independent_counters() {
    let catalog = common::test_catalog().await;
    let (device, tag) = seed_device_with_tag(&catalog).await;
    let key_id = seed_active_key(&catalog).await;

    let primary = Credential::builder()
        .username("admin")
        .secret_ciphertext(vec![1])
        .encryption_key_id(key_id)
        .priority(0)
        .build();
    let fallback = Credential::builder()
        .username("backup-admin")
        .secret_ciphertext(vec![2])
        .encryption_key_id(key_id)
        .priority(1)
        .build();
    catalog.insert_credential(&primary).await.unwrap();
    catalog.insert_credential(&fallback).await.unwrap();
    catalog.bind_credential_to_tag(tag.id, primary.id, 0).await.unwrap();
    catalog.bind_credential_to_tag(tag.id, fallback.id, 1).await.unwrap();

    let resolver = CredentialResolver::new(catalog.clone());
    let ranked = resolver.candidates_for_device(device.id).await.unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].credential.id, primary.id, "primary tried first");
    assert_eq!(ranked[1].credential.id, fallback.id);

    resolver.record_outcome(primary.id, DeviceErrorKind::AuthFailure).await.unwrap();
    resolver.record_outcome(fallback.id, DeviceErrorKind::Success).await.unwrap();

    let primary_after = catalog.get_credential(primary.id).await.unwrap();
    let fallback_after = catalog.get_credential(fallback.id).await.unwrap();
    assert_eq!(primary_after.failure_count, 1);
    assert_eq!(primary_after.success_count, 0);
    assert_eq!(fallback_after.success_count, 1);
    assert_eq!(fallback_after.failure_count, 0);
}

/// S3 — running the same job twice against the same device with identical
/// bytes produces exactly one Snapshot row and two references; diffing a
/// snapshot against itself yields only `Equal` ops.
#[tokio::test]
async fn identical_captures_dedup_to_one_snapshot() {
    let catalog = common::test_catalog().await;
    let (device, tag) = seed_device_with_tag(&catalog).await;

    let job = Job::builder()
        .name("dedup test")
        .kind(JobKind::Backup)
        .selector(JobSelector::Tag(tag.id).to_json())
        .build();
    catalog.insert_job(&job).await.unwrap();

    let run_a = catalog
        .enqueue_job_run(
            &JobRun::builder().job_id(job.id).resolved_devices(vec![device.id]).build(),
            0,
        )
        .await
        .unwrap();
    let run_b = catalog
        .enqueue_job_run(
            &JobRun::builder().job_id(job.id).resolved_devices(vec![device.id]).build(),
            0,
        )
        .await
        .unwrap();

    let snapshots = SnapshotStore::new(catalog.clone());
    let bytes = b"hostname r1\ninterface Gi0/1\n".to_vec();
    let first = snapshots.capture(run_a.id, device.id, bytes.clone()).await.unwrap();
    let second = snapshots.capture(run_b.id, device.id, bytes).await.unwrap();

    assert_eq!(first.id, second.id, "identical bytes collapse to one snapshot");

    let history = snapshots.history_for_device(device.id).await.unwrap();
    assert_eq!(history.len(), 1, "one snapshot row despite two references");

    let diff = snapshots.diff(device.id, first.id, second.id).await.unwrap();
    assert!(diff.iter().all(|op| matches!(op.kind, netraven_core::snapshot::DiffKind::Equal)));
}

/// S4 — a worker crash between the Sub-Result write and the terminal write
/// must not duplicate the Sub-Result when a second worker resumes: the
/// upsert is keyed by (run_id, device_id), so re-writing it is a no-op
/// update, not a second row.
#[tokio::test]
async fn sub_result_upsert_survives_duplicate_delivery() {
    let catalog = common::test_catalog().await;
    let (device, tag) = seed_device_with_tag(&catalog).await;
    let key_id = seed_active_key(&catalog).await;

    let credential = Credential::builder()
        .username("admin")
        .secret_ciphertext(vec![9])
        .encryption_key_id(key_id)
        .build();
    catalog.insert_credential(&credential).await.unwrap();
    catalog.bind_credential_to_tag(tag.id, credential.id, 0).await.unwrap();

    let job = Job::builder()
        .name("crash resume")
        .kind(JobKind::Backup)
        .selector(JobSelector::Device(device.id).to_json())
        .build();
    catalog.insert_job(&job).await.unwrap();
    let run = catalog
        .enqueue_job_run(
            &JobRun::builder().job_id(job.id).resolved_devices(vec![device.id]).build(),
            0,
        )
        .await
        .unwrap();

    // W1 writes the sub-result but dies before the terminal write.
    let first_attempt = DeviceSubResult::builder()
        .run_id(run.id)
        .device_id(device.id)
        .credential_id(credential.id)
        .status(DeviceErrorKind::Success)
        .build();
    catalog.upsert_sub_result(&first_attempt).await.unwrap();

    // W2 reclaims the run and re-processes the same device, upserting again.
    let second_attempt = DeviceSubResult::builder()
        .run_id(run.id)
        .device_id(device.id)
        .credential_id(credential.id)
        .status(DeviceErrorKind::Success)
        .build();
    catalog
        .finish_job_run_with_sub_result(run.id, JobRunStatus::CompletedSuccess, &second_attempt)
        .await
        .unwrap();

    let sub_results = catalog.sub_results_for_run(run.id).await.unwrap();
    assert_eq!(sub_results.len(), 1, "upsert keyed by (run_id, device_id), never duplicated");

    let finished = catalog.get_job_run(run.id).await.unwrap();
    assert_eq!(finished.status, JobRunStatus::CompletedSuccess);
}

/// S5 — a schedule that fell behind (dispatcher down for 6 hours on a
/// 1-hour interval) advances to exactly one occurrence strictly after now,
/// never a burst of six, and the (enqueue, advance) pair commits atomically.
#[tokio::test]
async fn schedule_catch_up_advances_once_not_in_a_burst() {
    let catalog = common::test_catalog().await;
    let (_, tag) = seed_device_with_tag(&catalog).await;

    let job = Job::builder()
        .name("hourly sweep")
        .kind(JobKind::Reachability)
        .selector(JobSelector::Tag(tag.id).to_json())
        .build();
    catalog.insert_job(&job).await.unwrap();

    let kind = ScheduleKind::Interval { period_seconds: 3600 };
    let stale_next_fire = Utc::now() - chrono::Duration::hours(6);
    let schedule = Schedule::builder()
        .job_id(job.id)
        .kind(kind.to_json())
        .next_fire_at(stale_next_fire)
        .build();
    catalog.insert_schedule(&schedule).await.unwrap();

    let now = Utc::now();
    let mut tx = catalog.begin().await.unwrap();
    let due = catalog.due_schedules(&mut tx, now).await.unwrap();
    assert_eq!(due.len(), 1);

    let parsed_kind = due[0].kind().unwrap();
    let next = next_fire_after(&parsed_kind, due[0].tz(), now).unwrap();
    assert!(next > now, "advanced past now, not left in the past");
    assert!(
        next <= now + chrono::Duration::seconds(3601),
        "advanced to the first occurrence strictly after now, not burst-fired"
    );

    catalog.advance_schedule(&mut tx, schedule.id, now, next).await.unwrap();
    tx.commit().await.unwrap();

    let refreshed = catalog.get_schedule(schedule.id).await.unwrap();
    assert_eq!(refreshed.next_fire_at, next);
    assert!(refreshed.last_fired_at.is_some());

    // No further schedules are due immediately after catch-up.
    let mut tx2 = catalog.begin().await.unwrap();
    let due_again = catalog.due_schedules(&mut tx2, now).await.unwrap();
    assert!(due_again.is_empty());
    tx2.commit().await.unwrap();
}

/// S6 — rotating the active encryption key re-seals every credential inside
/// one transaction: the sample opens under the new key and the old key no
/// longer has any credentials pointing at it.
#[tokio::test]
async fn key_rotation_reseals_every_credential_atomically() {
    let catalog = common::test_catalog().await;
    let key = EncryptionKey::builder().description("k1").build();
    catalog.insert_encryption_key(&key).await.unwrap();

    let vault = Vault::new(catalog.clone(), "test-salt-value".to_string());

    let mut credential_ids = Vec::new();
    for i in 0..10 {
        let (sealed, key_id) = vault.seal(format!("secret-{i}").as_bytes()).await.unwrap();
        let credential = Credential::builder()
            .username(format!("user{i}"))
            .secret_ciphertext(sealed)
            .encryption_key_id(key_id)
            .build();
        catalog.insert_credential(&credential).await.unwrap();
        credential_ids.push(credential.id);
    }

    let new_key_id = vault.rotate().await.unwrap();
    assert_ne!(new_key_id, key.id);

    for (i, id) in credential_ids.iter().enumerate() {
        let credential = catalog.get_credential(*id).await.unwrap();
        assert_eq!(credential.encryption_key_id, new_key_id);
        let plaintext = vault.open(&credential.secret_ciphertext, new_key_id).unwrap();
        assert_eq!(plaintext, format!("secret-{i}").as_bytes());
    }

    let mut check_tx = catalog.begin().await.unwrap();
    let old_key_refs = catalog.credential_ids_sealed_under(&mut check_tx, key.id).await.unwrap();
    check_tx.rollback().await.unwrap();
    assert!(old_key_refs.is_empty(), "no credential still references the retired key");
}

/// S7 — the durable queue's claim/ack/nack lifecycle: claim assigns a
/// visibility deadline, nack under `max_attempts` returns it to the queue,
/// and nack past `max_attempts` moves it to the dead letter instead.
#[tokio::test]
async fn queue_nack_moves_to_dead_letter_after_max_attempts() {
    let catalog = common::test_catalog().await;
    let (device, tag) = seed_device_with_tag(&catalog).await;
    let job = Job::builder()
        .name("flaky job")
        .kind(JobKind::Command)
        .selector(JobSelector::Tag(tag.id).to_json())
        .build();
    catalog.insert_job(&job).await.unwrap();
    let run = catalog
        .enqueue_job_run(
            &JobRun::builder().job_id(job.id).resolved_devices(vec![device.id]).build(),
            0,
        )
        .await
        .unwrap();

    let queue = Queue::new(catalog.pool().clone());

    for attempt in 1..=3 {
        let claimed = queue.claim("worker-a", Duration::from_secs(30)).await.unwrap();
        let item = claimed.expect("item claimable");
        assert_eq!(item.run_id, run.id);
        assert_eq!(item.attempts, attempt);
        queue.nack(run.id, "device unreachable", Duration::from_millis(1)).await.unwrap();
    }

    // `max_attempts` default is 3; the third nack should have moved the
    // item to the dead letter instead of making it claimable again.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let claim_after_exhausted = queue.claim("worker-a", Duration::from_secs(30)).await.unwrap();
    assert!(claim_after_exhausted.is_none(), "exhausted item must not be claimable");

    let dead_letter = queue.dead_letter_items().await.unwrap();
    assert_eq!(dead_letter.len(), 1);
    assert_eq!(dead_letter[0].run_id, run.id);
    assert_eq!(dead_letter[0].last_error.as_deref(), Some("device unreachable"));
}

/// S4 (queue side) — a claimed item whose worker dies becomes claimable
/// again once its visibility deadline lapses, without needing an explicit
/// nack.
#[tokio::test]
async fn reclaims_after_visibility_timeout_without_explicit_nack() {
    let catalog = common::test_catalog().await;
    let (device, tag) = seed_device_with_tag(&catalog).await;
    let job = Job::builder()
        .name("worker crash")
        .kind(JobKind::Backup)
        .selector(JobSelector::Tag(tag.id).to_json())
        .build();
    catalog.insert_job(&job).await.unwrap();
    let run = catalog
        .enqueue_job_run(
            &JobRun::builder().job_id(job.id).resolved_devices(vec![device.id]).build(),
            0,
        )
        .await
        .unwrap();

    let queue = Queue::new(catalog.pool().clone());
    let claimed_by_w1 = queue.claim("worker-1", Duration::from_millis(50)).await.unwrap();
    assert!(claimed_by_w1.is_some(), "worker-1 claims the only item");

    // worker-1 "dies": no ack, no nack. Another claim before the deadline
    // lapses must see nothing.
    let too_early = queue.claim("worker-2", Duration::from_secs(30)).await.unwrap();
    assert!(too_early.is_none());

    tokio::time::sleep(Duration::from_millis(80)).await;

    let claimed_by_w2 = queue.claim("worker-2", Duration::from_secs(30)).await.unwrap();
    let item = claimed_by_w2.expect("item reclaimed after visibility timeout");
    assert_eq!(item.run_id, run.id);
    assert_eq!(item.attempts, 2, "second claim increments the attempt counter");
}

/// §3: binding the same credential to two tags keeps only the best
/// (lowest) effective priority — exercised against real rows rather than
/// hand-built structs (resolver unit tests already cover the pure logic).
#[tokio::test]
async fn resolver_keeps_best_effective_priority_across_bindings() {
    let catalog = common::test_catalog().await;
    let (device, tag_a) = seed_device_with_tag(&catalog).await;
    let tag_b = Tag::builder().name("edge-routers").build();
    catalog.insert_tag(&tag_b).await.unwrap();
    catalog.add_device_tag(device.id, tag_b.id).await.unwrap();

    let key_id = seed_active_key(&catalog).await;
    let credential = Credential::builder()
        .username("admin")
        .secret_ciphertext(vec![7])
        .encryption_key_id(key_id)
        .priority(9)
        .build();
    catalog.insert_credential(&credential).await.unwrap();
    catalog.bind_credential_to_tag(tag_a.id, credential.id, 5).await.unwrap();
    catalog.bind_credential_to_tag(tag_b.id, credential.id, 1).await.unwrap();

    let resolver = CredentialResolver::new(catalog.clone());
    let ranked = resolver.candidates_for_device(device.id).await.unwrap();
    assert_eq!(ranked.len(), 1, "same credential through two tags, not duplicated");
    assert_eq!(ranked[0].effective_priority, 1, "best binding priority wins");
}

/// Dispatcher lease (§4.1, §5): a second instance cannot claim while the
/// first's lease is unexpired, an expired lease is claimable by anyone, and
/// the holder can renew its own lease before expiry.
#[tokio::test]
async fn dispatcher_lease_is_single_holder_with_expiry_takeover() {
    let catalog = common::test_catalog().await;
    let now = Utc::now();

    // Seed an already-expired lease directly (first insert is unconditional,
    // there's no row to conflict with yet).
    let seeded = catalog
        .claim_dispatcher_lease("instance-a", now - chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert!(seeded, "first claim on an empty lease table succeeds unconditionally");

    let takeover = catalog
        .claim_dispatcher_lease("instance-b", now + chrono::Duration::seconds(30))
        .await
        .unwrap();
    assert!(takeover, "an expired lease is claimable by a different instance");

    let stolen = catalog
        .claim_dispatcher_lease("instance-c", now + chrono::Duration::seconds(30))
        .await
        .unwrap();
    assert!(!stolen, "a third instance cannot claim an unexpired lease it doesn't hold");

    let renewed = catalog
        .claim_dispatcher_lease("instance-b", now + chrono::Duration::seconds(60))
        .await
        .unwrap();
    assert!(renewed, "the current holder can renew its own lease before expiry");

    let holder = catalog.current_lease_holder().await.unwrap();
    assert_eq!(holder.map(|(id, _)| id), Some("instance-b".to_string()));

    catalog.release_dispatcher_lease("instance-b").await.unwrap();
    assert!(catalog.current_lease_holder().await.unwrap().is_none());
}
