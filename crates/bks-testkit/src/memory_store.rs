//! In-memory `EntityStore` + `PushQueue`.
//!
//! Enforces the same keys as the Postgres schema (normalized email, client +
//! time, client foreign key) so reconciler scenarios see real conflicts.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bks_db::{
    EntityStore, Inserted, PushKind, PushQueue, PushQueueCounts, PushTask, StoreError,
};
use bks_schemas::{normalize_email, Appointment, Client, NewAppointment, NewClient};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Claimed,
    Sent,
    Dead,
}

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub task: PushTask,
    pub status: OutboxStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Inner {
    clients: Vec<Client>,
    appointments: Vec<Appointment>,
    outbox: Vec<OutboxEntry>,
    next_id: i64,
    /// Writes touching these normalized emails fail with a backend error.
    poisoned_emails: HashSet<String>,
    down: bool,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.down {
            return Err(backend("store is down"));
        }
        Ok(())
    }

    fn check_poison(&self, email: &str) -> Result<(), StoreError> {
        if self.poisoned_emails.contains(email) {
            return Err(backend(&format!("injected write failure for {email}")));
        }
        Ok(())
    }

    fn client_by_email(&self, email: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.email == email)
    }

    fn appointment_by_key(&self, client_id: i64, time: DateTime<Utc>) -> Option<&Appointment> {
        self.appointments
            .iter()
            .find(|a| a.client_id == client_id && a.time == time)
    }

    fn insert_client(&mut self, new: &NewClient) -> Result<Client, StoreError> {
        let email = normalize_email(&new.email);
        self.check_poison(&email)?;
        if email.is_empty() {
            return Err(backend("email must not be blank"));
        }
        if self.client_by_email(&email).is_some() {
            return Err(StoreError::Conflict(format!(
                "insert client constraint=uq_clients_email email={email}"
            )));
        }
        let client = Client {
            id: self.next_id(),
            name: new.name.clone(),
            email,
            phone: new.phone.clone(),
            created_at_utc: Utc::now(),
        };
        self.clients.push(client.clone());
        Ok(client)
    }

    fn insert_appointment(&mut self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        if !self.clients.iter().any(|c| c.id == new.client_id) {
            return Err(StoreError::MissingReference(format!(
                "insert appointment client_id={}",
                new.client_id
            )));
        }
        if self.appointment_by_key(new.client_id, new.time).is_some() {
            return Err(StoreError::Conflict(format!(
                "insert appointment constraint=uq_appointments_client_time client_id={}",
                new.client_id
            )));
        }
        let appointment = Appointment {
            id: self.next_id(),
            client_id: new.client_id,
            time: new.time,
            created_at_utc: Utc::now(),
        };
        self.appointments.push(appointment.clone());
        Ok(appointment)
    }

    fn enqueue(&mut self, kind: PushKind, local_id: i64, payload: Value) {
        let id = self.next_id();
        self.outbox.push(OutboxEntry {
            task: PushTask {
                id,
                kind,
                local_id,
                payload,
                attempts: 0,
                next_attempt_at: Utc::now(),
            },
            status: OutboxStatus::Pending,
            claimed_at: None,
            last_error: None,
        });
    }

    fn entry_mut(&mut self, id: i64) -> Result<&mut OutboxEntry, StoreError> {
        self.outbox
            .iter_mut()
            .find(|e| e.task.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("push task id={id}")))
    }
}

fn backend(msg: &str) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("{msg}"))
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write for `email` fail with a backend error.
    pub async fn poison_email(&self, email: &str) {
        self.inner
            .lock()
            .await
            .poisoned_emails
            .insert(normalize_email(email));
    }

    /// Every call fails with a backend error while down; `ping` returns false.
    pub async fn set_down(&self, down: bool) {
        self.inner.lock().await.down = down;
    }

    /// Insert without an outbox row, as if the client already existed.
    pub async fn seed_client(&self, client: &NewClient) -> Result<Client, StoreError> {
        self.inner.lock().await.insert_client(client)
    }

    pub async fn seed_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Appointment, StoreError> {
        self.inner.lock().await.insert_appointment(appointment)
    }

    pub async fn outbox(&self) -> Vec<OutboxEntry> {
        self.inner.lock().await.outbox.clone()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        let mut out = g.clients.clone();
        out.sort_by(|a, b| {
            b.created_at_utc
                .cmp(&a.created_at_utc)
                .then(b.id.cmp(&a.id))
        });
        Ok(out)
    }

    async fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        Ok(g.client_by_email(&normalize_email(email)).cloned())
    }

    async fn insert_client_if_absent(
        &self,
        client: &NewClient,
    ) -> Result<Inserted<Client>, StoreError> {
        let mut g = self.inner.lock().await;
        g.check_up()?;
        if let Some(existing) = g.client_by_email(&normalize_email(&client.email)) {
            return Ok(Inserted::Existing(existing.clone()));
        }
        g.insert_client(client).map(Inserted::Created)
    }

    async fn update_client_contact(
        &self,
        id: i64,
        name: &str,
        phone: &str,
    ) -> Result<Client, StoreError> {
        let mut g = self.inner.lock().await;
        g.check_up()?;
        let email = g
            .clients
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.email.clone())
            .ok_or_else(|| StoreError::NotFound(format!("client id={id}")))?;
        g.check_poison(&email)?;
        let client = g
            .clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("client id={id}")))?;
        client.name = name.to_string();
        client.phone = phone.to_string();
        Ok(client.clone())
    }

    async fn count_clients(&self) -> Result<i64, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        Ok(g.clients.len() as i64)
    }

    async fn list_appointments(
        &self,
        client_id: Option<i64>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        let mut out: Vec<Appointment> = g
            .appointments
            .iter()
            .filter(|a| client_id.map_or(true, |id| a.client_id == id))
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.time, a.id));
        Ok(out)
    }

    async fn find_appointment(
        &self,
        client_id: i64,
        time: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        Ok(g.appointment_by_key(client_id, time).cloned())
    }

    async fn insert_appointment_if_absent(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Inserted<Appointment>, StoreError> {
        let mut g = self.inner.lock().await;
        g.check_up()?;
        if let Some(existing) = g.appointment_by_key(appointment.client_id, appointment.time) {
            return Ok(Inserted::Existing(existing.clone()));
        }
        g.insert_appointment(appointment).map(Inserted::Created)
    }

    async fn count_appointments(&self) -> Result<i64, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        Ok(g.appointments.len() as i64)
    }

    async fn appointments_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(Appointment, Client)>, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        let mut out: Vec<(Appointment, Client)> = g
            .appointments
            .iter()
            .filter(|a| a.time >= start && a.time < end)
            .filter_map(|a| {
                g.clients
                    .iter()
                    .find(|c| c.id == a.client_id)
                    .map(|c| (a.clone(), c.clone()))
            })
            .collect();
        out.sort_by_key(|(a, _)| (a.time, a.id));
        Ok(out)
    }

    async fn create_client(&self, client: &NewClient) -> Result<Client, StoreError> {
        let mut g = self.inner.lock().await;
        g.check_up()?;
        let created = g.insert_client(client)?;
        let payload = serde_json::to_value(NewClient::from(&created))
            .map_err(|e| backend(&e.to_string()))?;
        g.enqueue(PushKind::Client, created.id, payload);
        Ok(created)
    }

    async fn create_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Appointment, StoreError> {
        let mut g = self.inner.lock().await;
        g.check_up()?;
        let created = g.insert_appointment(appointment)?;
        let payload = serde_json::to_value(NewAppointment::from(&created))
            .map_err(|e| backend(&e.to_string()))?;
        g.enqueue(PushKind::Appointment, created.id, payload);
        Ok(created)
    }

    async fn ping(&self) -> bool {
        !self.inner.lock().await.down
    }
}

#[async_trait]
impl PushQueue for MemoryStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<PushTask>, StoreError> {
        let mut g = self.inner.lock().await;
        g.check_up()?;
        let stale_before = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(now);

        let mut due: Vec<usize> = g
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, e)| match e.status {
                OutboxStatus::Pending => e.task.next_attempt_at <= now,
                OutboxStatus::Claimed => e.claimed_at.map_or(true, |at| at < stale_before),
                OutboxStatus::Sent | OutboxStatus::Dead => false,
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| (g.outbox[i].task.next_attempt_at, g.outbox[i].task.id));
        due.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));

        let mut out = Vec::with_capacity(due.len());
        for i in due {
            let entry = &mut g.outbox[i];
            entry.status = OutboxStatus::Claimed;
            entry.claimed_at = Some(now);
            out.push(entry.task.clone());
        }
        Ok(out)
    }

    async fn mark_sent(&self, id: i64) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        let e = g.entry_mut(id)?;
        e.status = OutboxStatus::Sent;
        e.claimed_at = None;
        e.last_error = None;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        let e = g.entry_mut(id)?;
        e.status = OutboxStatus::Pending;
        e.task.attempts = attempts;
        e.task.next_attempt_at = next_attempt_at;
        e.claimed_at = None;
        e.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_dead(&self, id: i64, attempts: i32, error: &str) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        let e = g.entry_mut(id)?;
        e.status = OutboxStatus::Dead;
        e.task.attempts = attempts;
        e.claimed_at = None;
        e.last_error = Some(error.to_string());
        Ok(())
    }

    async fn release(&self, id: i64) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        let e = g.entry_mut(id)?;
        if e.status == OutboxStatus::Claimed {
            e.status = OutboxStatus::Pending;
            e.claimed_at = None;
        }
        Ok(())
    }

    async fn counts(&self) -> Result<PushQueueCounts, StoreError> {
        let g = self.inner.lock().await;
        g.check_up()?;
        let mut c = PushQueueCounts::default();
        for e in &g.outbox {
            match e.status {
                OutboxStatus::Pending => c.pending += 1,
                OutboxStatus::Claimed => c.claimed += 1,
                OutboxStatus::Sent => c.sent += 1,
                OutboxStatus::Dead => c.dead += 1,
            }
        }
        Ok(c)
    }
}
