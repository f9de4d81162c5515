//! bks-db
//!
//! Local persistence for clients, appointments and the push outbox.
//!
//! The core only sees the [`EntityStore`] and [`PushQueue`] traits. [`PgStore`]
//! is the Postgres implementation; uniqueness is enforced by the schema and
//! conditional inserts use `on conflict do nothing`, so concurrent writers
//! cannot create duplicates.

mod error;
mod pg;
mod store;

pub use error::StoreError;
pub use pg::PgStore;
pub use store::{EntityStore, Inserted, PushKind, PushQueue, PushQueueCounts, PushTask};

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "BKS_DATABASE_URL";

/// Connect to Postgres using `BKS_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    tracing::debug!("postgres pool ready");
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (has_clients, has_push_outbox): (bool, bool) = sqlx::query_as(
        r#"
        select
            exists (select 1 from information_schema.tables
                    where table_schema = 'public' and table_name = 'clients'),
            exists (select 1 from information_schema.tables
                    where table_schema = 'public' and table_name = 'push_outbox')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_clients_table: has_clients,
        has_push_outbox_table: has_push_outbox,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStatus {
    pub ok: bool,
    pub has_clients_table: bool,
    pub has_push_outbox_table: bool,
}
