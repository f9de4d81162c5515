use std::sync::Arc;

use bks_db::EntityStore;
use bks_reconcile::SyncOutcome;
use bks_runtime::Reconciler;
use bks_schemas::NewClient;
use bks_testkit::{remote_appointment, remote_client, FakeRemote, MemoryStore};
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn first_pass_creates_second_pass_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeRemote::new());
    let t1 = Utc.with_ymd_and_hms(2025, 7, 18, 9, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2025, 7, 18, 10, 30, 0).unwrap();

    remote
        .set_clients(vec![
            remote_client(7, "Ada Lovelace", "Ada@Example.com", "555-0100"),
            remote_client(8, "Alan Turing", "alan@example.com", "555-0101"),
        ])
        .await;

    let reconciler = Reconciler::new(store.clone(), remote.clone());
    let cancel = CancellationToken::new();

    // Appointments reference local ids; learn them after the first client pull.
    let clients = reconciler.pull_clients(&cancel).await;
    assert_eq!(clients.created, 2);
    assert_eq!(clients.total_local, Some(2));

    let ada = store
        .find_client_by_email("ada@example.com")
        .await
        .unwrap()
        .expect("ada created with normalized email");
    assert_eq!(ada.email, "ada@example.com");
    assert_eq!(ada.name, "Ada Lovelace");

    remote
        .set_appointments(vec![
            remote_appointment(ada.id, t2),
            remote_appointment(ada.id, t1),
        ])
        .await;

    let first = reconciler.run(&cancel).await;
    assert_eq!(first.outcome, SyncOutcome::Completed);
    assert_eq!(first.clients.fetched, 2);
    assert_eq!(first.clients.unchanged, 2);
    assert_eq!(first.appointments.created, 2);
    assert_eq!(first.appointments.total_local, Some(2));

    let second = reconciler.run(&cancel).await;
    assert_eq!(second.outcome, SyncOutcome::Completed);
    assert_eq!(second.changes(), 0);
    assert_eq!(second.failures(), 0);
    assert_eq!(second.clients.unchanged, 2);
    assert_eq!(second.appointments.present, 2);

    // Pulled records are never pushed back out.
    assert!(store.outbox().await.is_empty());

    let listed = store.list_appointments(Some(ada.id)).await.unwrap();
    assert_eq!(listed.iter().map(|a| a.time).collect::<Vec<_>>(), vec![t1, t2]);
}

#[tokio::test]
async fn remote_contact_change_updates_local_row_in_place() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(FakeRemote::new());
    let seeded = store
        .seed_client(&NewClient::new("Grace", "grace@example.com", "555-0000"))
        .await
        .unwrap();

    remote
        .set_clients(vec![remote_client(
            1,
            "Grace Hopper",
            " GRACE@example.com ",
            "555-0199",
        )])
        .await;

    let reconciler = Reconciler::new(store.clone(), remote.clone());
    let report = reconciler.run(&CancellationToken::new()).await;
    assert_eq!(report.clients.updated, 1);
    assert_eq!(report.clients.created, 0);

    let after = store
        .find_client_by_email("grace@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.id, seeded.id);
    assert_eq!(after.name, "Grace Hopper");
    assert_eq!(after.phone, "555-0199");
    assert_eq!(store.count_clients().await.unwrap(), 1);
}
