//! bks-testkit
//!
//! In-process doubles for scenario tests: [`MemoryStore`] stands in for
//! Postgres, [`FakeRemote`] for the remote booking service. No network, no DB.

mod fake_remote;
mod memory_store;

pub use fake_remote::FakeRemote;
pub use memory_store::{MemoryStore, OutboxEntry, OutboxStatus};

use bks_schemas::{RemoteAppointment, RemoteClient};
use chrono::{DateTime, Utc};
use serde_json::json;

pub fn remote_client(id: i64, name: &str, email: &str, phone: &str) -> RemoteClient {
    RemoteClient {
        id: Some(json!(id)),
        name: name.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
    }
}

pub fn remote_appointment(client_id: i64, time: DateTime<Utc>) -> RemoteAppointment {
    RemoteAppointment {
        id: None,
        client_id,
        time,
    }
}
