//! Request and response types for all bks-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use bks_db::PushQueueCounts;
use bks_reconcile::SyncReport;
use bks_schemas::{NewAppointment, NewClient};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope for entity reads and creates
// ---------------------------------------------------------------------------

/// `{success, message, data}` on success, `{success: false, errors}` on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            errors,
        }
    }
}

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub database: bool,
    pub sync_enabled: bool,
    /// Gateway health check: enabled and the remote answered.
    pub remote_sync: bool,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// /v1/clients  /v1/appointments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClientRequest {
    pub client: NewClient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub appointment: NewAppointment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentQuery {
    pub client_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// /v1/sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    pub sync_enabled: bool,
    pub last_report: Option<SyncReport>,
    /// `None` when the queue could not be read.
    pub push: Option<PushQueueCounts>,
}
