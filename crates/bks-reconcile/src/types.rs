use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counts for one client pull phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPullSummary {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records skipped because of a persistence failure or an unusable key.
    pub failed: usize,
    /// Local client count after the phase; `None` if the count itself failed.
    pub total_local: Option<i64>,
}

/// Counts for one appointment pull phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentPullSummary {
    pub fetched: usize,
    pub created: usize,
    pub present: usize,
    pub failed: usize,
    pub total_local: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed,
    /// Precondition failed (sync disabled, remote unreachable); nothing was done.
    Skipped(String),
    /// Stopped between records; counts cover the work done so far.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub clients: ClientPullSummary,
    pub appointments: AppointmentPullSummary,
    pub started_at_utc: DateTime<Utc>,
    pub finished_at_utc: DateTime<Utc>,
}

impl SyncReport {
    pub fn skipped(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            outcome: SyncOutcome::Skipped(reason.into()),
            clients: ClientPullSummary::default(),
            appointments: AppointmentPullSummary::default(),
            started_at_utc: at,
            finished_at_utc: at,
        }
    }

    /// Local rows written by this run.
    pub fn changes(&self) -> usize {
        self.clients.created + self.clients.updated + self.appointments.created
    }

    pub fn failures(&self) -> usize {
        self.clients.failed + self.appointments.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_serializes_with_status_tag() {
        assert_eq!(
            serde_json::to_value(SyncOutcome::Completed).unwrap(),
            json!({"status": "completed"})
        );
        assert_eq!(
            serde_json::to_value(SyncOutcome::Skipped("sync disabled".into())).unwrap(),
            json!({"status": "skipped", "reason": "sync disabled"})
        );
    }

    #[test]
    fn skipped_report_has_zero_counts() {
        let r = SyncReport::skipped("sync disabled", Utc::now());
        assert_eq!(r.changes(), 0);
        assert_eq!(r.failures(), 0);
        assert_eq!(r.clients.total_local, None);
    }
}
