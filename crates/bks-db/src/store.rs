//! Store contracts consumed by the reconciler, the push worker and the daemon.
//!
//! Postgres implements them in [`crate::PgStore`]; tests use the in-memory
//! store from `bks-testkit`. Both must enforce the same keys: one client per
//! normalized email, one appointment per (client_id, time), and no appointment
//! for an unknown client.

use std::time::Duration;

use async_trait::async_trait;
use bks_schemas::{Appointment, Client, NewAppointment, NewClient};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::StoreError;

/// Result of an atomic insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted<T> {
    Created(T),
    /// The key was already taken; this is the row holding it.
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Inserted::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Inserted::Created(v) | Inserted::Existing(v) => v,
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Newest first.
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError>;

    /// `email` is normalized before lookup.
    async fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, StoreError>;

    /// Keyed on normalized email. Does not enqueue a push.
    async fn insert_client_if_absent(
        &self,
        client: &NewClient,
    ) -> Result<Inserted<Client>, StoreError>;

    async fn update_client_contact(
        &self,
        id: i64,
        name: &str,
        phone: &str,
    ) -> Result<Client, StoreError>;

    async fn count_clients(&self) -> Result<i64, StoreError>;

    /// Time ascending, optionally restricted to one client.
    async fn list_appointments(
        &self,
        client_id: Option<i64>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn find_appointment(
        &self,
        client_id: i64,
        time: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Keyed on (client_id, time). Does not enqueue a push.
    async fn insert_appointment_if_absent(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Inserted<Appointment>, StoreError>;

    async fn count_appointments(&self) -> Result<i64, StoreError>;

    /// Appointments with `start <= time < end`, joined to their client.
    async fn appointments_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(Appointment, Client)>, StoreError>;

    /// Ordinary write path: entity row and push outbox row commit together.
    async fn create_client(&self, client: &NewClient) -> Result<Client, StoreError>;

    /// Ordinary write path: entity row and push outbox row commit together.
    async fn create_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> Result<Appointment, StoreError>;

    async fn ping(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    Client,
    Appointment,
}

impl PushKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushKind::Client => "CLIENT",
            PushKind::Appointment => "APPOINTMENT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "CLIENT" => Ok(PushKind::Client),
            "APPOINTMENT" => Ok(PushKind::Appointment),
            other => Err(StoreError::Backend(anyhow::anyhow!(
                "unknown push kind in outbox: {other}"
            ))),
        }
    }
}

/// A claimed outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct PushTask {
    pub id: i64,
    pub kind: PushKind,
    pub local_id: i64,
    /// `NewClient` or `NewAppointment` as JSON.
    pub payload: Value,
    /// Failed attempts so far.
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PushQueueCounts {
    pub pending: i64,
    pub claimed: i64,
    pub sent: i64,
    pub dead: i64,
}

#[async_trait]
pub trait PushQueue: Send + Sync {
    /// Claim up to `limit` PENDING tasks due at `now`, plus CLAIMED tasks whose
    /// claim is older than `lease`. Claimed tasks are not visible to other
    /// claimers until released or the lease runs out.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<PushTask>, StoreError>;

    async fn mark_sent(&self, id: i64) -> Result<(), StoreError>;

    async fn mark_retry(
        &self,
        id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn mark_dead(&self, id: i64, attempts: i32, error: &str) -> Result<(), StoreError>;

    /// Back to PENDING without consuming an attempt.
    async fn release(&self, id: i64) -> Result<(), StoreError>;

    async fn counts(&self) -> Result<PushQueueCounts, StoreError>;
}
