//! Shared runtime state for bks-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum.

use std::sync::Arc;
use std::time::Duration;

use bks_db::{EntityStore, PushQueue};
use bks_reconcile::{SyncOutcome, SyncReport};
use bks_remote::RemoteGateway;
use bks_runtime::{PushHandle, Reconciler};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Sync(SyncReport),
    LogLine { level: String, msg: String },
}

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub store: Arc<dyn EntityStore>,
    pub queue: Arc<dyn PushQueue>,
    pub gateway: Arc<dyn RemoteGateway>,
    pub reconciler: Reconciler,
    /// Pokes the push worker after a local create commits.
    pub push: PushHandle,
    pub last_sync: Arc<RwLock<Option<SyncReport>>>,
    /// Cancelled on shutdown; stops an in-flight pass between records.
    pub shutdown: CancellationToken,
    sync_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EntityStore>,
        queue: Arc<dyn PushQueue>,
        gateway: Arc<dyn RemoteGateway>,
        push: PushHandle,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&gateway));
        Self {
            bus,
            build: BuildInfo {
                service: "bks-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            queue,
            gateway,
            reconciler,
            push,
            last_sync: Arc::new(RwLock::new(None)),
            shutdown: CancellationToken::new(),
            sync_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run one reconcile pass unless one is already in flight in this
    /// process. Returns `None` when busy.
    pub async fn run_sync(&self) -> Option<SyncReport> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            debug!("reconcile pass already running");
            return None;
        };

        let report = self.reconciler.run(&self.shutdown).await;
        *self.last_sync.write().await = Some(report.clone());

        let _ = self.bus.send(BusMsg::Sync(report.clone()));
        if report.failures() > 0 {
            let _ = self.bus.send(BusMsg::LogLine {
                level: "WARN".to_string(),
                msg: format!("reconcile pass finished with {} failures", report.failures()),
            });
        }
        Some(report)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Emit a heartbeat on the bus every `interval` until `shutdown` fires.
pub fn spawn_heartbeat(
    bus: broadcast::Sender<BusMsg>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    })
}

/// Spawn the periodic pull. Skips a tick while an on-demand pass is running
/// and stops once the shutdown token fires.
pub fn spawn_sync_tick(state: Arc<AppState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => {
                    info!("periodic sync stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            match state.run_sync().await {
                Some(r) if r.outcome == SyncOutcome::Cancelled => return,
                Some(_) => {}
                None => debug!("periodic sync tick skipped: pass in flight"),
            }
        }
    })
}
