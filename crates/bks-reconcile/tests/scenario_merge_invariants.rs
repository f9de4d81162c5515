//! Merge invariants over generated inputs.

use std::collections::HashSet;

use bks_reconcile::{merge_appointments, merge_clients};
use bks_schemas::{normalize_email, Appointment, Client, Origin, RemoteAppointment, RemoteClient};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

/// Small alphabet so collisions are common; case and padding vary.
fn email() -> impl Strategy<Value = String> {
    (0u8..6, any::<bool>(), any::<bool>()).prop_map(|(n, upper, pad)| {
        let base = format!("user{n}@x.com");
        let base = if upper { base.to_uppercase() } else { base };
        if pad {
            format!(" {base} ")
        } else {
            base
        }
    })
}

fn local_clients() -> impl Strategy<Value = Vec<Client>> {
    // local emails are unique after normalization, like the store guarantees
    proptest::collection::btree_set(0u8..6, 0..6).prop_map(|ns| {
        ns.into_iter()
            .enumerate()
            .map(|(i, n)| Client {
                id: i as i64 + 1,
                name: format!("L{n}"),
                email: format!("user{n}@x.com"),
                phone: String::new(),
                created_at_utc: at(0),
            })
            .collect()
    })
}

fn remote_clients() -> impl Strategy<Value = Vec<RemoteClient>> {
    proptest::collection::vec(email(), 0..10).prop_map(|emails| {
        emails
            .into_iter()
            .map(|email| RemoteClient {
                id: None,
                name: "R".to_string(),
                email,
                phone: String::new(),
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn merged_clients_have_unique_keys_and_local_wins(
        local in local_clients(),
        remote in remote_clients(),
    ) {
        let merged = merge_clients(&local, &remote);

        let mut keys = HashSet::new();
        for m in &merged {
            prop_assert!(keys.insert(normalize_email(&m.email)), "duplicate key {}", m.email);
        }

        let local_keys: HashSet<String> = local.iter().map(|c| normalize_email(&c.email)).collect();
        for m in &merged {
            if local_keys.contains(&normalize_email(&m.email)) {
                prop_assert_eq!(m.origin, Origin::Local);
            }
        }

        // every local record survives, in store order, ahead of all externals
        prop_assert!(merged.len() >= local.len());
        for (m, c) in merged.iter().zip(local.iter()) {
            prop_assert_eq!(&m.email, &c.email);
            prop_assert_eq!(m.origin, Origin::Local);
        }
    }

    #[test]
    fn merged_appointments_are_sorted_union(
        local_times in proptest::collection::vec(0i64..50, 0..8),
        remote_times in proptest::collection::vec(0i64..50, 0..8),
    ) {
        let local: Vec<Appointment> = local_times
            .iter()
            .enumerate()
            .map(|(i, m)| Appointment {
                id: i as i64 + 1,
                client_id: 1,
                time: at(*m),
                created_at_utc: at(0),
            })
            .collect();
        let remote: Vec<RemoteAppointment> = remote_times
            .iter()
            .map(|m| RemoteAppointment { id: None, client_id: 1, time: at(*m) })
            .collect();

        let merged = merge_appointments(&local, &remote);

        prop_assert_eq!(merged.len(), local.len() + remote.len());
        prop_assert!(merged.windows(2).all(|w| w[0].time <= w[1].time));
        for w in merged.windows(2) {
            if w[0].time == w[1].time && w[0].origin == Origin::External {
                prop_assert_eq!(w[1].origin, Origin::External, "local must precede external on ties");
            }
        }
    }
}
