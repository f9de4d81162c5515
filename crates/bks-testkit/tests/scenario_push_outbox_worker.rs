use std::sync::Arc;
use std::time::Duration;

use bks_config::PushPolicy;
use bks_db::{EntityStore, PushQueue};
use bks_remote::GatewayError;
use bks_runtime::{spawn_push_worker, PushHandle, PushWorker};
use bks_schemas::{NewAppointment, NewClient};
use bks_testkit::{FakeRemote, MemoryStore, OutboxStatus};
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

fn policy() -> PushPolicy {
    PushPolicy {
        max_attempts: 3,
        base_backoff_ms: 1_000,
        max_backoff_ms: 10_000,
        batch_size: 8,
        poll_interval_ms: 60_000,
        claim_lease_secs: 60,
    }
}

fn worker(store: &Arc<MemoryStore>, remote: &Arc<FakeRemote>) -> PushWorker {
    PushWorker::new(store.clone(), remote.clone(), policy(), PushHandle::new())
}

#[tokio::test]
async fn local_creates_are_mirrored_once() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeRemote::new());

    let ada = store
        .create_client(&NewClient::new("Ada", " ADA@example.com", "555"))
        .await
        .unwrap();
    store
        .create_client(&NewClient::new("Bob", "bob@example.com", "556"))
        .await
        .unwrap();
    let t = Utc.with_ymd_and_hms(2030, 1, 2, 9, 0, 0).unwrap();
    store
        .create_appointment(&NewAppointment { client_id: ada.id, time: t })
        .await
        .unwrap();
    assert_eq!(store.counts().await.unwrap().pending, 3);

    let w = worker(&store, &remote);
    let report = w.drain(Utc::now()).await.unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.sent, 3);

    let pushed = remote.pushed_clients().await;
    assert_eq!(pushed.len(), 2);
    assert_eq!(pushed[0].email, "ada@example.com");
    assert_eq!(
        remote.pushed_appointments().await,
        vec![NewAppointment { client_id: ada.id, time: t }]
    );

    // nothing left to send
    let again = w.drain(Utc::now()).await.unwrap();
    assert_eq!(again.claimed, 0);
    assert_eq!(remote.create_calls(), 3);
    assert_eq!(store.counts().await.unwrap().sent, 3);
}

#[tokio::test]
async fn transient_failures_back_off_then_dead_letter() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeRemote::new());
    store
        .create_client(&NewClient::new("Ada", "ada@example.com", "555"))
        .await
        .unwrap();
    remote
        .script_pushes(vec![
            Err(GatewayError::Status(503)),
            Err(GatewayError::Transport("connection reset".to_string())),
            Err(GatewayError::Status(503)),
        ])
        .await;

    let w = worker(&store, &remote);
    let now = Utc::now() + chrono::Duration::seconds(1);

    let r1 = w.drain_once(now).await.unwrap();
    assert_eq!(r1.retried, 1);
    let entry = store.outbox().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Pending);
    assert_eq!(entry.task.attempts, 1);
    assert_eq!(entry.task.next_attempt_at, now + chrono::Duration::seconds(1));

    // not due yet
    assert_eq!(w.drain_once(now).await.unwrap().claimed, 0);

    let later = now + chrono::Duration::seconds(1);
    let r2 = w.drain_once(later).await.unwrap();
    assert_eq!(r2.retried, 1);
    let entry = store.outbox().await.remove(0);
    assert_eq!(entry.task.attempts, 2);
    assert_eq!(entry.task.next_attempt_at, later + chrono::Duration::seconds(2));

    let r3 = w
        .drain_once(later + chrono::Duration::seconds(2))
        .await
        .unwrap();
    assert_eq!(r3.dead, 1);
    let entry = store.outbox().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Dead);
    assert_eq!(entry.task.attempts, 3);
    assert!(entry.last_error.as_deref().unwrap_or("").contains("503"));
    assert!(remote.pushed_clients().await.is_empty());
}

#[tokio::test]
async fn rejected_payload_is_dead_lettered_immediately() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeRemote::new());
    store
        .create_client(&NewClient::new("Ada", "ada@example.com", "555"))
        .await
        .unwrap();
    remote.script_pushes(vec![Err(GatewayError::Status(422))]).await;

    let report = worker(&store, &remote).drain(Utc::now()).await.unwrap();
    assert_eq!(report.dead, 1);
    assert_eq!(store.outbox().await[0].task.attempts, 1);
    assert_eq!(remote.create_calls(), 1);
}

#[tokio::test]
async fn disabled_sync_leaves_tasks_pending_until_enabled() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeRemote::disabled());
    store
        .create_client(&NewClient::new("Ada", "ada@example.com", "555"))
        .await
        .unwrap();

    let w = worker(&store, &remote);
    let report = w.drain(Utc::now()).await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(remote.create_calls(), 0);
    let counts = store.counts().await.unwrap();
    assert_eq!(counts.pending, 1);
    assert_eq!(store.outbox().await[0].task.attempts, 0);

    remote.set_enabled(true);
    let report = w.drain(Utc::now()).await.unwrap();
    assert_eq!(report.sent, 1);
}

#[tokio::test]
async fn stale_claim_becomes_claimable_after_lease() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_client(&NewClient::new("Ada", "ada@example.com", "555"))
        .await
        .unwrap();
    let now = Utc::now() + chrono::Duration::seconds(1);
    let lease = Duration::from_secs(60);

    assert_eq!(store.claim_due(now, 10, lease).await.unwrap().len(), 1);
    assert!(store.claim_due(now, 10, lease).await.unwrap().is_empty());
    assert_eq!(store.counts().await.unwrap().claimed, 1);

    let after_lease = now + chrono::Duration::seconds(61);
    assert_eq!(store.claim_due(after_lease, 10, lease).await.unwrap().len(), 1);
}

#[tokio::test]
async fn worker_wakes_on_notify() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeRemote::new());
    let handle = PushHandle::new();
    let cancel = CancellationToken::new();
    let join = spawn_push_worker(
        PushWorker::new(store.clone(), remote.clone(), policy(), handle.clone()),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    store
        .create_client(&NewClient::new("Ada", "ada@example.com", "555"))
        .await
        .unwrap();
    handle.notify();

    let mut sent = false;
    for _ in 0..100 {
        if !remote.pushed_clients().await.is_empty() {
            sent = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(sent, "worker did not push after notify");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .expect("worker stops on cancel")
        .unwrap();
}
