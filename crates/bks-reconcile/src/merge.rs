//! Read-time merge of local and remote records. Display only; never persisted.

use std::collections::HashSet;

use bks_schemas::{
    normalize_email, Appointment, Client, MergedAppointment, MergedClient, Origin, RecordId,
    RemoteAppointment, RemoteClient,
};

/// Local clients first (store order), then remote clients (fetch order),
/// keeping the first occurrence of each normalized email. Local wins any
/// collision because it comes first.
pub fn merge_clients(local: &[Client], remote: &[RemoteClient]) -> Vec<MergedClient> {
    let locals = local.iter().map(|c| MergedClient {
        id: RecordId::Local(c.id),
        name: c.name.clone(),
        email: c.email.clone(),
        phone: c.phone.clone(),
        origin: Origin::Local,
    });
    let externals = remote.iter().enumerate().map(|(pos, r)| MergedClient {
        id: RecordId::external(r.id.as_ref(), pos),
        name: r.name.clone(),
        email: r.email.clone(),
        phone: r.phone.clone(),
        origin: Origin::External,
    });

    let mut seen: HashSet<String> = HashSet::new();
    locals
        .chain(externals)
        .filter(|m| seen.insert(normalize_email(&m.email)))
        .collect()
}

/// Union of local and remote appointments, no dedup, stably sorted by time.
pub fn merge_appointments(
    local: &[Appointment],
    remote: &[RemoteAppointment],
) -> Vec<MergedAppointment> {
    let mut merged: Vec<MergedAppointment> = local
        .iter()
        .map(|a| MergedAppointment {
            id: RecordId::Local(a.id),
            client_id: a.client_id,
            time: a.time,
            origin: Origin::Local,
        })
        .chain(remote.iter().enumerate().map(|(pos, r)| MergedAppointment {
            id: RecordId::external(r.id.as_ref(), pos),
            client_id: r.client_id,
            time: r.time,
            origin: Origin::External,
        }))
        .collect();

    // stable: equal times keep local-before-external and fetch order
    merged.sort_by_key(|a| a.time);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 18, h, 0, 0).unwrap()
    }

    fn client(id: i64, email: &str) -> Client {
        Client {
            id,
            name: format!("local-{id}"),
            email: email.to_string(),
            phone: String::new(),
            created_at_utc: t(0),
        }
    }

    fn rclient(id: i64, email: &str) -> RemoteClient {
        RemoteClient {
            id: Some(json!(id)),
            name: format!("remote-{id}"),
            email: email.to_string(),
            phone: String::new(),
        }
    }

    #[test]
    fn local_wins_email_collision() {
        let merged = merge_clients(
            &[client(1, "a@x.com")],
            &[rclient(1, "A@X.com "), rclient(2, "b@x.com")],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, RecordId::Local(1));
        assert_eq!(merged[0].origin, Origin::Local);
        assert_eq!(merged[1].id, RecordId::External("ext-2".into()));
        assert_eq!(merged[1].origin, Origin::External);
    }

    #[test]
    fn duplicate_remote_emails_keep_first() {
        let merged = merge_clients(&[], &[rclient(3, "c@x.com"), rclient(4, "c@x.com")]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "remote-3");
    }

    #[test]
    fn no_remote_is_local_only_view() {
        let local = [client(2, "b@x.com"), client(1, "a@x.com")];
        let merged = merge_clients(&local, &[]);
        let ids: Vec<_> = merged.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![RecordId::Local(2), RecordId::Local(1)]);
    }

    #[test]
    fn appointments_are_a_sorted_union() {
        let local = [Appointment {
            id: 1,
            client_id: 7,
            time: t(10),
            created_at_utc: t(0),
        }];
        let remote = [
            RemoteAppointment {
                id: None,
                client_id: 7,
                time: t(10),
            },
            RemoteAppointment {
                id: Some(json!("r9")),
                client_id: 8,
                time: t(9),
            },
        ];
        let merged = merge_appointments(&local, &remote);

        assert_eq!(merged.len(), 3, "same key on both sides is not deduplicated");
        assert_eq!(merged[0].id, RecordId::External("ext-r9".into()));
        assert_eq!(merged[1].origin, Origin::Local, "tie keeps local first");
        assert_eq!(merged[2].id, RecordId::External("ext-#0".into()));
    }
}
