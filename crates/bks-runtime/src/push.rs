//! Push outbox worker.
//!
//! The write path commits an outbox row with each new entity and pokes the
//! worker through [`PushHandle`]. The worker claims due rows and mirrors them
//! to the remote one at a time, outside any request. Failures are retried with
//! capped exponential backoff and dead-lettered after `max_attempts`.

use std::sync::Arc;

use bks_config::PushPolicy;
use bks_db::{PushKind, PushQueue, PushTask, StoreError};
use bks_remote::{GatewayError, PushResult, RemoteGateway};
use bks_schemas::{NewAppointment, NewClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wakes the worker. Cheap to clone; a wake sent while the worker is busy is
/// kept and consumed on its next wait.
#[derive(Debug, Clone, Default)]
pub struct PushHandle {
    notify: Arc<Notify>,
}

impl PushHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
    /// Handed back untouched because sync turned off mid-batch.
    pub released: usize,
}

enum PushStep {
    Sent,
    Retried,
    Dead,
    Released,
}

pub struct PushWorker {
    queue: Arc<dyn PushQueue>,
    gateway: Arc<dyn RemoteGateway>,
    policy: PushPolicy,
    handle: PushHandle,
}

impl PushWorker {
    pub fn new(
        queue: Arc<dyn PushQueue>,
        gateway: Arc<dyn RemoteGateway>,
        policy: PushPolicy,
        handle: PushHandle,
    ) -> Self {
        Self {
            queue,
            gateway,
            policy,
            handle,
        }
    }

    /// Claim one batch due at `now` and push it. Disabled sync is a no-op and
    /// leaves every task pending.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();
        if !self.gateway.is_enabled() {
            debug!("sync disabled; push drain skipped");
            return Ok(report);
        }

        let tasks = self
            .queue
            .claim_due(now, self.policy.batch_limit(), self.policy.claim_lease())
            .await?;
        report.claimed = tasks.len();

        for task in &tasks {
            match self.push_one(task, now).await? {
                PushStep::Sent => report.sent += 1,
                PushStep::Retried => report.retried += 1,
                PushStep::Dead => report.dead += 1,
                PushStep::Released => report.released += 1,
            }
        }
        Ok(report)
    }

    /// Drain until the queue has nothing due at `now`.
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DrainReport, StoreError> {
        let mut total = DrainReport::default();
        loop {
            let r = self.drain_once(now).await?;
            total.claimed += r.claimed;
            total.sent += r.sent;
            total.retried += r.retried;
            total.dead += r.dead;
            total.released += r.released;

            let full_batch = r.claimed as i64 >= self.policy.batch_limit();
            if !full_batch || r.released > 0 {
                return Ok(total);
            }
        }
    }

    async fn push_one(&self, task: &PushTask, now: DateTime<Utc>) -> Result<PushStep, StoreError> {
        let result = self.send(task).await;
        let kind = task.kind.as_str();

        let err = match result {
            Ok(_) => {
                self.queue.mark_sent(task.id).await?;
                info!(task_id = task.id, kind, local_id = task.local_id, "pushed local record to remote");
                return Ok(PushStep::Sent);
            }
            Err(GatewayError::Disabled) => {
                self.queue.release(task.id).await?;
                info!(task_id = task.id, kind, "sync disabled; push left pending");
                return Ok(PushStep::Released);
            }
            Err(e) => e,
        };

        let attempts = task.attempts.saturating_add(1);
        let max_attempts = i32::try_from(self.policy.max_attempts.max(1)).unwrap_or(i32::MAX);
        if err.is_retryable() && attempts < max_attempts {
            let delay = self.policy.backoff_for(u32::try_from(attempts).unwrap_or(u32::MAX));
            let next = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now);
            warn!(
                task_id = task.id,
                kind,
                attempt = attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "push failed; will retry"
            );
            self.queue
                .mark_retry(task.id, attempts, next, &err.to_string())
                .await?;
            Ok(PushStep::Retried)
        } else {
            error!(
                task_id = task.id,
                kind,
                local_id = task.local_id,
                attempt = attempts,
                error = %err,
                "push failed permanently; dead-lettered"
            );
            self.queue
                .mark_dead(task.id, attempts, &err.to_string())
                .await?;
            Ok(PushStep::Dead)
        }
    }

    async fn send(&self, task: &PushTask) -> PushResult {
        let bad_payload =
            |e: serde_json::Error| GatewayError::Malformed(format!("outbox payload: {e}"));
        match task.kind {
            PushKind::Client => {
                let client: NewClient =
                    serde_json::from_value(task.payload.clone()).map_err(bad_payload)?;
                self.gateway.create_client(&client).await
            }
            PushKind::Appointment => {
                let appointment: NewAppointment =
                    serde_json::from_value(task.payload.clone()).map_err(bad_payload)?;
                self.gateway.create_appointment(&appointment).await
            }
        }
    }

    /// Worker loop: drain, then sleep until poked, polled or cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        if !self.gateway.is_enabled() {
            info!("push worker idle: sync disabled");
        }
        loop {
            match self.drain(Utc::now()).await {
                Ok(r) if r.claimed > 0 => info!(
                    claimed = r.claimed,
                    sent = r.sent,
                    retried = r.retried,
                    dead = r.dead,
                    "push drain complete"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "push drain failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("push worker stopped");
                    return;
                }
                _ = self.handle.notified() => {}
                _ = tokio::time::sleep(self.policy.poll_interval()) => {}
            }
        }
    }
}

pub fn spawn_push_worker(worker: PushWorker, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(worker.run(cancel))
}
