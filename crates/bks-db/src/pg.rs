//! Postgres implementation of [`EntityStore`] and [`PushQueue`].

use std::time::Duration;

use async_trait::async_trait;
use bks_schemas::{normalize_email, Appointment, Client, NewAppointment, NewClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::store::{EntityStore, Inserted, PushKind, PushQueue, PushQueueCounts, PushTask};
use crate::StoreError;

const CLIENT_COLS: &str = "id, name, email, phone, created_at_utc";
const APPOINTMENT_COLS: &str = "id, client_id, scheduled_at, created_at_utc";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn enqueue_push<T: Serialize>(
        tx: &mut Transaction<'_, Postgres>,
        kind: PushKind,
        local_id: i64,
        payload: &T,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_value(payload).map_err(|e| {
            StoreError::Backend(anyhow::Error::new(e).context("push payload serialize failed"))
        })?;
        sqlx::query(
            r#"
            insert into push_outbox (kind, local_id, payload)
            values ($1, $2, $3)
            "#,
        )
        .bind(kind.as_str())
        .bind(local_id)
        .bind(payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "push_outbox insert"))?;
        Ok(())
    }
}

fn client_from_row(row: &PgRow) -> Result<Client, sqlx::Error> {
    Ok(Client {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn appointment_from_row(row: &PgRow) -> Result<Appointment, sqlx::Error> {
    Ok(Appointment {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        time: row.try_get("scheduled_at")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn decode<T>(res: Result<T, sqlx::Error>, ctx: &str) -> Result<T, StoreError> {
    res.map_err(|e| StoreError::from_sqlx(e, ctx))
}

#[async_trait]
impl EntityStore for PgStore {
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        let rows = sqlx::query(&format!(
            "select {CLIENT_COLS} from clients order by created_at_utc desc, id desc"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "list clients"))?;

        rows.iter()
            .map(|r| decode(client_from_row(r), "decode client"))
            .collect()
    }

    async fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, StoreError> {
        let row = sqlx::query(&format!("select {CLIENT_COLS} from clients where email = $1"))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, "find client by email"))?;

        row.as_ref()
            .map(|r| decode(client_from_row(r), "decode client"))
            .transpose()
    }

    async fn insert_client_if_absent(
        &self,
        client: &NewClient,
    ) -> Result<Inserted<Client>, StoreError> {
        let email = normalize_email(&client.email);
        let row = sqlx::query(&format!(
            r#"
            insert into clients (name, email, phone)
            values ($1, $2, $3)
            on conflict (email) do nothing
            returning {CLIENT_COLS}
            "#
        ))
        .bind(&client.name)
        .bind(&email)
        .bind(&client.phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "insert client if absent"))?;

        if let Some(r) = row {
            return Ok(Inserted::Created(decode(client_from_row(&r), "decode client")?));
        }

        match self.find_client_by_email(&email).await? {
            Some(existing) => Ok(Inserted::Existing(existing)),
            None => Err(StoreError::NotFound(format!(
                "client email={email} vanished after conflict"
            ))),
        }
    }

    async fn update_client_contact(
        &self,
        id: i64,
        name: &str,
        phone: &str,
    ) -> Result<Client, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            update clients
            set name = $2,
                phone = $3,
                updated_at_utc = now()
            where id = $1
            returning {CLIENT_COLS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "update client contact"))?;

        match row {
            Some(r) => decode(client_from_row(&r), "decode client"),
            None => Err(StoreError::NotFound(format!("client id={id}"))),
        }
    }

    async fn count_clients(&self) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as("select count(*) from clients")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, "count clients"))?;
        Ok(n)
    }

    async fn list_appointments(
        &self,
        client_id: Option<i64>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            select {APPOINTMENT_COLS}
            from appointments
            where ($1::bigint is null or client_id = $1)
            order by scheduled_at asc, id asc
            "#
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "list appointments"))?;

        rows.iter()
            .map(|r| decode(appointment_from_row(r), "decode appointment"))
            .collect()
    }

    async fn find_appointment(
        &self,
        client_id: i64,
        time: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query(&format!(
            "select {APPOINTMENT_COLS} from appointments where client_id = $1 and scheduled_at = $2"
        ))
        .bind(client_id)
        .bind(time)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "find appointment"))?;

        row.as_ref()
            .map(|r| decode(appointment_from_row(r), "decode appointment"))
            .transpose()
    }

    async fn insert_appointment_if_absent(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Inserted<Appointment>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            insert into appointments (client_id, scheduled_at)
            values ($1, $2)
            on conflict (client_id, scheduled_at) do nothing
            returning {APPOINTMENT_COLS}
            "#
        ))
        .bind(appointment.client_id)
        .bind(appointment.time)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "insert appointment if absent"))?;

        if let Some(r) = row {
            return Ok(Inserted::Created(decode(
                appointment_from_row(&r),
                "decode appointment",
            )?));
        }

        match self
            .find_appointment(appointment.client_id, appointment.time)
            .await?
        {
            Some(existing) => Ok(Inserted::Existing(existing)),
            None => Err(StoreError::NotFound(format!(
                "appointment client_id={} time={} vanished after conflict",
                appointment.client_id, appointment.time
            ))),
        }
    }

    async fn count_appointments(&self) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as("select count(*) from appointments")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, "count appointments"))?;
        Ok(n)
    }

    async fn appointments_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(Appointment, Client)>, StoreError> {
        let rows = sqlx::query(
            r#"
            select a.id, a.client_id, a.scheduled_at, a.created_at_utc,
                   c.name, c.email, c.phone, c.created_at_utc as client_created_at_utc
            from appointments a
            join clients c on c.id = a.client_id
            where a.scheduled_at >= $1 and a.scheduled_at < $2
            order by a.scheduled_at asc, a.id asc
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "appointments between"))?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            let appt = decode(appointment_from_row(r), "decode appointment")?;
            let client = Client {
                id: appt.client_id,
                name: decode(r.try_get("name"), "decode client name")?,
                email: decode(r.try_get("email"), "decode client email")?,
                phone: decode(r.try_get("phone"), "decode client phone")?,
                created_at_utc: decode(
                    r.try_get("client_created_at_utc"),
                    "decode client created_at",
                )?,
            };
            out.push((appt, client));
        }
        Ok(out)
    }

    async fn create_client(&self, client: &NewClient) -> Result<Client, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_sqlx(e, "begin create client"))?;

        let row = sqlx::query(&format!(
            "insert into clients (name, email, phone) values ($1, $2, $3) returning {CLIENT_COLS}"
        ))
        .bind(&client.name)
        .bind(normalize_email(&client.email))
        .bind(&client.phone)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "insert client"))?;
        let created = decode(client_from_row(&row), "decode client")?;

        Self::enqueue_push(&mut tx, PushKind::Client, created.id, &NewClient::from(&created))
            .await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx(e, "commit create client"))?;
        Ok(created)
    }

    async fn create_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Appointment, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_sqlx(e, "begin create appointment"))?;

        let row = sqlx::query(&format!(
            "insert into appointments (client_id, scheduled_at) values ($1, $2) returning {APPOINTMENT_COLS}"
        ))
        .bind(appointment.client_id)
        .bind(appointment.time)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "insert appointment"))?;
        let created = decode(appointment_from_row(&row), "decode appointment")?;

        Self::enqueue_push(
            &mut tx,
            PushKind::Appointment,
            created.id,
            &NewAppointment::from(&created),
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx(e, "commit create appointment"))?;
        Ok(created)
    }

    async fn ping(&self) -> bool {
        sqlx::query("select 1").execute(&self.pool).await.is_ok()
    }
}

fn push_task_from_row(row: &PgRow) -> Result<PushTask, StoreError> {
    let kind: String = decode(row.try_get("kind"), "decode push kind")?;
    let payload: Value = decode(row.try_get("payload"), "decode push payload")?;
    Ok(PushTask {
        id: decode(row.try_get("id"), "decode push id")?,
        kind: PushKind::parse(&kind)?,
        local_id: decode(row.try_get("local_id"), "decode push local_id")?,
        payload,
        attempts: decode(row.try_get("attempts"), "decode push attempts")?,
        next_attempt_at: decode(row.try_get("next_attempt_at"), "decode push next_attempt_at")?,
    })
}

#[async_trait]
impl PushQueue for PgStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<PushTask>, StoreError> {
        // SKIP LOCKED: concurrent workers never claim the same row.
        let rows = sqlx::query(
            r#"
            with due as (
                select id
                from push_outbox
                where (status = 'PENDING' and next_attempt_at <= $1)
                   or (status = 'CLAIMED' and claimed_at < $1 - make_interval(secs => $3))
                order by next_attempt_at asc, id asc
                limit $2
                for update skip locked
            )
            update push_outbox o
            set status = 'CLAIMED',
                claimed_at = $1
            from due
            where o.id = due.id
            returning o.id, o.kind, o.local_id, o.payload, o.attempts, o.next_attempt_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "claim due push tasks"))?;

        let mut tasks = rows
            .iter()
            .map(push_task_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tasks.sort_by_key(|t| (t.next_attempt_at, t.id));
        Ok(tasks)
    }

    async fn mark_sent(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            update push_outbox
            set status = 'SENT',
                sent_at_utc = now(),
                claimed_at = null,
                last_error = null
            where id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "mark push sent"))?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            update push_outbox
            set status = 'PENDING',
                attempts = $2,
                next_attempt_at = $3,
                last_error = $4,
                claimed_at = null
            where id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "mark push retry"))?;
        Ok(())
    }

    async fn mark_dead(&self, id: i64, attempts: i32, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            update push_outbox
            set status = 'DEAD',
                attempts = $2,
                last_error = $3,
                claimed_at = null
            where id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "mark push dead"))?;
        Ok(())
    }

    async fn release(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "update push_outbox set status = 'PENDING', claimed_at = null where id = $1 and status = 'CLAIMED'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "release push claim"))?;
        Ok(())
    }

    async fn counts(&self) -> Result<PushQueueCounts, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("select status, count(*) from push_outbox group by status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::from_sqlx(e, "count push tasks"))?;

        let mut counts = PushQueueCounts::default();
        for (status, n) in rows {
            match status.as_str() {
                "PENDING" => counts.pending = n,
                "CLAIMED" => counts.claimed = n,
                "SENT" => counts.sent = n,
                "DEAD" => counts.dead = n,
                _ => {}
            }
        }
        Ok(counts)
    }
}
