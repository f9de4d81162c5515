//! Scripted `RemoteGateway`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bks_remote::{GatewayError, PushResult, RemoteGateway};
use bks_schemas::{NewAppointment, NewClient, RemoteAppointment, RemoteClient};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Fake remote service. Behaves like the HTTP gateway at the boundary: when
/// disabled it returns empty fetches and `GatewayError::Disabled` without
/// counting a call.
pub struct FakeRemote {
    enabled: AtomicBool,
    healthy: AtomicBool,
    clients: Mutex<Vec<RemoteClient>>,
    appointments: Mutex<Vec<RemoteAppointment>>,
    /// Outcomes for upcoming creates, consumed in order; empty means success.
    push_script: Mutex<VecDeque<PushResult>>,
    pushed_clients: Mutex<Vec<NewClient>>,
    pushed_appointments: Mutex<Vec<NewAppointment>>,
    cancel_on_client_fetch: Mutex<Option<CancellationToken>>,
    cancel_on_appointment_fetch: Mutex<Option<CancellationToken>>,
    fetch_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            clients: Mutex::new(Vec::new()),
            appointments: Mutex::new(Vec::new()),
            push_script: Mutex::new(VecDeque::new()),
            pushed_clients: Mutex::new(Vec::new()),
            pushed_appointments: Mutex::new(Vec::new()),
            cancel_on_client_fetch: Mutex::new(None),
            cancel_on_appointment_fetch: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }

    pub fn disabled() -> Self {
        let f = Self::new();
        f.set_enabled(false);
        f
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub async fn set_clients(&self, clients: Vec<RemoteClient>) {
        *self.clients.lock().await = clients;
    }

    pub async fn set_appointments(&self, appointments: Vec<RemoteAppointment>) {
        *self.appointments.lock().await = appointments;
    }

    pub async fn script_pushes(&self, outcomes: impl IntoIterator<Item = PushResult>) {
        self.push_script.lock().await.extend(outcomes);
    }

    /// Cancel `token` as soon as clients have been fetched.
    pub async fn cancel_after_client_fetch(&self, token: CancellationToken) {
        *self.cancel_on_client_fetch.lock().await = Some(token);
    }

    /// Cancel `token` as soon as appointments have been fetched.
    pub async fn cancel_after_appointment_fetch(&self, token: CancellationToken) {
        *self.cancel_on_appointment_fetch.lock().await = Some(token);
    }

    pub async fn pushed_clients(&self) -> Vec<NewClient> {
        self.pushed_clients.lock().await.clone()
    }

    pub async fn pushed_appointments(&self) -> Vec<NewAppointment> {
        self.pushed_appointments.lock().await.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    async fn next_push_outcome(&self) -> PushResult {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.push_script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"success": true})))
    }
}

#[async_trait]
impl RemoteGateway for FakeRemote {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn fetch_clients(&self) -> Vec<RemoteClient> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let out = self.clients.lock().await.clone();
        if let Some(token) = self.cancel_on_client_fetch.lock().await.take() {
            token.cancel();
        }
        out
    }

    async fn fetch_appointments(&self) -> Vec<RemoteAppointment> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let out = self.appointments.lock().await.clone();
        if let Some(token) = self.cancel_on_appointment_fetch.lock().await.take() {
            token.cancel();
        }
        out
    }

    async fn create_client(&self, client: &NewClient) -> PushResult {
        if !self.is_enabled() {
            return Err(GatewayError::Disabled);
        }
        let outcome = self.next_push_outcome().await;
        if outcome.is_ok() {
            self.pushed_clients.lock().await.push(client.clone());
        }
        outcome
    }

    async fn create_appointment(&self, appointment: &NewAppointment) -> PushResult {
        if !self.is_enabled() {
            return Err(GatewayError::Disabled);
        }
        let outcome = self.next_push_outcome().await;
        if outcome.is_ok() {
            self.pushed_appointments.lock().await.push(appointment.clone());
        }
        outcome
    }

    async fn health_check(&self) -> bool {
        self.is_enabled() && self.healthy.load(Ordering::SeqCst)
    }
}
