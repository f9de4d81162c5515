//! Conditional inserts honour both dedup keys, including under concurrency.
//! Skips when `BKS_DATABASE_URL` is not set.

use bks_db::{EntityStore, Inserted, PgStore, StoreError};
use bks_schemas::{NewAppointment, NewClient};
use chrono::{Duration, TimeZone, Utc};

async fn store() -> anyhow::Result<Option<PgStore>> {
    let url = match std::env::var(bks_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: BKS_DATABASE_URL not set");
            return Ok(None);
        }
    };
    let pool = bks_db::connect(&url).await?;
    bks_db::migrate(&pool).await?;
    Ok(Some(PgStore::new(pool)))
}

fn unique_email(tag: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{tag}-{nanos}-{}@Example.COM", std::process::id())
}

#[tokio::test]
async fn client_insert_is_keyed_on_normalized_email() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let email = unique_email("dedupe");

    let first = store
        .insert_client_if_absent(&NewClient::new("Ann", format!("  {email} "), "1"))
        .await?;
    assert!(first.was_created());
    let first = first.into_inner();
    assert_eq!(first.email, email.to_lowercase());

    let second = store
        .insert_client_if_absent(&NewClient::new("Other", email.to_uppercase(), "2"))
        .await?;
    match second {
        Inserted::Existing(c) => {
            assert_eq!(c.id, first.id);
            assert_eq!(c.name, "Ann", "existing row is returned untouched");
        }
        Inserted::Created(_) => panic!("second insert must not create"),
    }

    let found = store.find_client_by_email(&email).await?.expect("row");
    assert_eq!(found.id, first.id);
    Ok(())
}

#[tokio::test]
async fn create_client_reports_conflict_on_duplicate() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let email = unique_email("conflict");

    store.create_client(&NewClient::new("Ann", &email, "1")).await?;
    let err = store
        .create_client(&NewClient::new("Ann", &email, "1"))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "got {err}");
    Ok(())
}

#[tokio::test]
async fn appointment_keys_and_foreign_key() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let client = store
        .insert_client_if_absent(&NewClient::new("Bo", unique_email("appt"), "1"))
        .await?
        .into_inner();
    let time = Utc.with_ymd_and_hms(2031, 7, 18, 9, 0, 0).unwrap();
    let new = NewAppointment {
        client_id: client.id,
        time,
    };

    assert!(store.insert_appointment_if_absent(&new).await?.was_created());
    assert!(!store.insert_appointment_if_absent(&new).await?.was_created());
    assert!(store.find_appointment(client.id, time).await?.is_some());

    let later = NewAppointment {
        client_id: client.id,
        time: time + Duration::hours(1),
    };
    store.insert_appointment_if_absent(&later).await?;
    let mine = store.list_appointments(Some(client.id)).await?;
    assert_eq!(mine.len(), 2);
    assert!(mine[0].time < mine[1].time);

    let orphan = NewAppointment {
        client_id: i64::MAX,
        time,
    };
    let err = store.insert_appointment_if_absent(&orphan).await.unwrap_err();
    assert!(matches!(err, StoreError::MissingReference(_)), "got {err}");
    Ok(())
}

#[tokio::test]
async fn concurrent_inserts_create_one_row() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let email = unique_email("race");
    let store = std::sync::Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let email = email.clone();
        handles.push(tokio::spawn(async move {
            store
                .insert_client_if_absent(&NewClient::new(format!("n{i}"), email, "1"))
                .await
        }));
    }

    let mut created = 0;
    let mut ids = std::collections::HashSet::new();
    for h in handles {
        let ins = h.await??;
        if ins.was_created() {
            created += 1;
        }
        ids.insert(ins.into_inner().id);
    }
    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
    Ok(())
}
