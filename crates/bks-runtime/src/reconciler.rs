//! Pull-side reconciliation job.
//!
//! One sequential pass per call: clients first, then appointments, records in
//! fetch order. A failure on one record is logged and counted; it never stops
//! the batch. The cancellation token is checked before every record.

use std::sync::Arc;

use bks_db::{EntityStore, Inserted, StoreError};
use bks_reconcile::{
    plan_appointment, plan_client, remote_client_key, AppointmentAction, AppointmentPullSummary,
    ClientAction, ClientPullSummary, SyncOutcome, SyncReport,
};
use bks_remote::RemoteGateway;
use bks_schemas::{RemoteAppointment, RemoteClient};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum ClientStep {
    Created,
    Updated,
    Unchanged,
}

enum AppointmentStep {
    Created,
    Present,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn EntityStore>,
    gateway: Arc<dyn RemoteGateway>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EntityStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self { store, gateway }
    }

    /// Full pass. Exits without touching the store when the gateway is
    /// disabled or the remote does not answer its health check.
    pub async fn run(&self, cancel: &CancellationToken) -> SyncReport {
        let started_at_utc = Utc::now();

        if !self.gateway.is_enabled() {
            info!("sync disabled; reconciler skipped");
            return SyncReport::skipped("sync disabled", started_at_utc);
        }
        if !self.gateway.health_check().await {
            warn!("remote service unavailable; reconciler skipped");
            return SyncReport::skipped("remote unavailable", started_at_utc);
        }

        info!("reconcile pass started");
        let clients = self.pull_clients(cancel).await;
        let appointments = if cancel.is_cancelled() {
            AppointmentPullSummary::default()
        } else {
            self.pull_appointments(cancel).await
        };

        let outcome = if cancel.is_cancelled() {
            SyncOutcome::Cancelled
        } else {
            SyncOutcome::Completed
        };
        let report = SyncReport {
            outcome,
            clients,
            appointments,
            started_at_utc,
            finished_at_utc: Utc::now(),
        };
        info!(
            outcome = ?report.outcome,
            changes = report.changes(),
            failures = report.failures(),
            "reconcile pass finished"
        );
        report
    }

    pub async fn pull_clients(&self, cancel: &CancellationToken) -> ClientPullSummary {
        let remote = self.gateway.fetch_clients().await;
        let mut summary = ClientPullSummary {
            fetched: remote.len(),
            ..ClientPullSummary::default()
        };

        for (pos, r) in remote.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(processed = pos, "client pull cancelled");
                break;
            }
            let Some(key) = remote_client_key(r) else {
                summary.failed += 1;
                warn!(pos, "remote client has no email; skipped");
                continue;
            };
            match self.pull_client(&key, r).await {
                Ok(ClientStep::Created) => summary.created += 1,
                Ok(ClientStep::Updated) => summary.updated += 1,
                Ok(ClientStep::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(email = %key, error = %e, "failed to reconcile remote client");
                }
            }
        }

        summary.total_local = match self.store.count_clients().await {
            Ok(n) => Some(n),
            Err(e) => {
                error!(error = %e, "client count failed");
                None
            }
        };
        info!(
            fetched = summary.fetched,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            total_local = ?summary.total_local,
            "client pull complete"
        );
        summary
    }

    async fn pull_client(&self, key: &str, remote: &RemoteClient) -> Result<ClientStep, StoreError> {
        let local = self.store.find_client_by_email(key).await?;
        match plan_client(local.as_ref(), remote) {
            ClientAction::Unchanged => Ok(ClientStep::Unchanged),
            ClientAction::Update { id, name, phone } => {
                self.update_contact(id, &name, &phone).await
            }
            ClientAction::Create(new) => match self.store.insert_client_if_absent(&new).await? {
                Inserted::Created(c) => {
                    debug!(id = c.id, email = %c.email, "created local client from remote");
                    Ok(ClientStep::Created)
                }
                // another writer took the key between lookup and insert
                Inserted::Existing(c) => match plan_client(Some(&c), remote) {
                    ClientAction::Update { id, name, phone } => {
                        self.update_contact(id, &name, &phone).await
                    }
                    _ => Ok(ClientStep::Unchanged),
                },
            },
        }
    }

    async fn update_contact(
        &self,
        id: i64,
        name: &str,
        phone: &str,
    ) -> Result<ClientStep, StoreError> {
        let c = self.store.update_client_contact(id, name, phone).await?;
        debug!(id = c.id, email = %c.email, "updated local client from remote");
        Ok(ClientStep::Updated)
    }

    pub async fn pull_appointments(&self, cancel: &CancellationToken) -> AppointmentPullSummary {
        let remote = self.gateway.fetch_appointments().await;
        let mut summary = AppointmentPullSummary {
            fetched: remote.len(),
            ..AppointmentPullSummary::default()
        };

        for (pos, r) in remote.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(processed = pos, "appointment pull cancelled");
                break;
            }
            match self.pull_appointment(r).await {
                Ok(AppointmentStep::Created) => summary.created += 1,
                Ok(AppointmentStep::Present) => summary.present += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        client_id = r.client_id,
                        time = %r.time,
                        error = %e,
                        "failed to reconcile remote appointment"
                    );
                }
            }
        }

        summary.total_local = match self.store.count_appointments().await {
            Ok(n) => Some(n),
            Err(e) => {
                error!(error = %e, "appointment count failed");
                None
            }
        };
        info!(
            fetched = summary.fetched,
            created = summary.created,
            present = summary.present,
            failed = summary.failed,
            total_local = ?summary.total_local,
            "appointment pull complete"
        );
        summary
    }

    async fn pull_appointment(
        &self,
        remote: &RemoteAppointment,
    ) -> Result<AppointmentStep, StoreError> {
        let exists = self
            .store
            .find_appointment(remote.client_id, remote.time)
            .await?
            .is_some();
        match plan_appointment(exists, remote) {
            AppointmentAction::Present => Ok(AppointmentStep::Present),
            AppointmentAction::Create(new) => {
                match self.store.insert_appointment_if_absent(&new).await? {
                    Inserted::Created(a) => {
                        debug!(id = a.id, client_id = a.client_id, time = %a.time, "created local appointment from remote");
                        Ok(AppointmentStep::Created)
                    }
                    Inserted::Existing(_) => Ok(AppointmentStep::Present),
                }
            }
        }
    }
}
