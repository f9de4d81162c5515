//! Pull-phase decisions for a single remote record.

use bks_schemas::{normalize_email, Client, NewAppointment, NewClient, RemoteAppointment, RemoteClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    Create(NewClient),
    /// Contact fields differ; only `name` and `phone` are written.
    Update { id: i64, name: String, phone: String },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppointmentAction {
    Create(NewAppointment),
    /// Same (client_id, time) exists locally. Appointments are never updated by a pull.
    Present,
}

/// Dedup key of a remote client, or `None` when it has no usable email.
pub fn remote_client_key(remote: &RemoteClient) -> Option<String> {
    let key = normalize_email(&remote.email);
    (!key.is_empty()).then_some(key)
}

pub fn plan_client(local: Option<&Client>, remote: &RemoteClient) -> ClientAction {
    match local {
        None => ClientAction::Create(NewClient {
            name: remote.name.clone(),
            email: normalize_email(&remote.email),
            phone: remote.phone.clone(),
        }),
        Some(c) if c.name != remote.name || c.phone != remote.phone => ClientAction::Update {
            id: c.id,
            name: remote.name.clone(),
            phone: remote.phone.clone(),
        },
        Some(_) => ClientAction::Unchanged,
    }
}

pub fn plan_appointment(exists_locally: bool, remote: &RemoteAppointment) -> AppointmentAction {
    if exists_locally {
        AppointmentAction::Present
    } else {
        AppointmentAction::Create(NewAppointment {
            client_id: remote.client_id,
            time: remote.time,
        })
    }
}
