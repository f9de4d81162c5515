//! bks-reconcile
//!
//! Pure reconciliation logic. No IO, no store calls, no network.
//!
//! - [`merge`]: the read-time merged view of local and remote records.
//! - [`pull`]: per-record pull decisions (create, update, leave alone).
//! - [`types`]: per-phase summaries and the run report.
//!
//! The runtime crate drives these against the store and the gateway.

pub mod merge;
pub mod pull;
mod types;

pub use merge::{merge_appointments, merge_clients};
pub use pull::{plan_appointment, plan_client, remote_client_key, AppointmentAction, ClientAction};
pub use types::*;
