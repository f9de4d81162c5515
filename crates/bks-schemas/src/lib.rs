//! Shared record shapes for clients and appointments.
//!
//! Local rows (`Client`, `Appointment`) come from the entity store; remote rows
//! (`RemoteClient`, `RemoteAppointment`) are decoded leniently from the remote
//! service; merged rows carry an [`Origin`] tag and a namespaced [`RecordId`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Dedup key for clients: trimmed, lower-cased email.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Local rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    /// Always stored normalized (see [`normalize_email`]).
    pub email: String,
    pub phone: String,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub client_id: i64,
    pub time: DateTime<Utc>,
    pub created_at_utc: DateTime<Utc>,
}

/// Client payload: local create input and the remote `{client: {...}}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl NewClient {
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
        }
    }

    /// Same payload with the email in dedup-key form.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.clone(),
            email: normalize_email(&self.email),
            phone: self.phone.clone(),
        }
    }
}

impl NewClient {
    /// Create-path validation for locally entered clients. Pulled records skip
    /// this; remote data is taken as-is.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let name = self.name.trim().chars().count();
        if name == 0 {
            errors.push("Name is required".to_string());
        } else if name < 2 {
            errors.push("Name must be at least 2 characters".to_string());
        } else if name > 100 {
            errors.push("Name must be no more than 100 characters".to_string());
        }

        let email = normalize_email(&self.email);
        if email.is_empty() {
            errors.push("Email is required".to_string());
        } else if !looks_like_email(&email) {
            errors.push("Email must be a valid email address".to_string());
        }

        let phone = self.phone.trim().chars().count();
        if phone == 0 {
            errors.push("Phone is required".to_string());
        } else if phone < 10 {
            errors.push("Phone must be at least 10 digits".to_string());
        } else if phone > 15 {
            errors.push("Phone must be no more than 15 digits".to_string());
        }

        errors
    }
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

impl From<&Client> for NewClient {
    fn from(c: &Client) -> Self {
        Self::new(c.name.clone(), c.email.clone(), c.phone.clone())
    }
}

/// Appointment payload: local create input and the remote `{appointment: {...}}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub client_id: i64,
    pub time: DateTime<Utc>,
}

impl NewAppointment {
    pub fn validation_errors(&self, now: DateTime<Utc>) -> Vec<String> {
        if self.time <= now {
            vec!["Time must be in the future".to_string()]
        } else {
            Vec::new()
        }
    }
}

impl From<&Appointment> for NewAppointment {
    fn from(a: &Appointment) -> Self {
        Self {
            client_id: a.client_id,
            time: a.time,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote rows
// ---------------------------------------------------------------------------

/// Client as reported by the remote service.
///
/// Unknown fields are ignored. `email` is required; `name` / `phone` default to
/// empty and accept numbers (remote data is not validated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteClient {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: String,
}

/// Appointment as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAppointment {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient_i64")]
    pub client_id: i64,
    pub time: DateTime<Utc>,
}

fn lenient_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(de)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string, got {other}"
        ))),
    }
}

fn lenient_i64<'de, D>(de: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(de)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("expected integer id, got {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("expected integer id, got {s:?}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected integer id, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Merged view
// ---------------------------------------------------------------------------

/// Where a merged row came from. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    External,
}

/// Identity of a merged row.
///
/// Local ids stay JSON numbers; external ids are strings prefixed `ext-`, so the
/// two spaces can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Local(i64),
    External(String),
}

pub const EXTERNAL_ID_PREFIX: &str = "ext-";

impl RecordId {
    /// Namespace a remote identity. Records without a usable id are keyed by
    /// their fetch position (`ext-#3`).
    pub fn external(remote_id: Option<&Value>, position: usize) -> Self {
        let raw = match remote_id {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => format!("#{position}"),
        };
        RecordId::External(format!("{EXTERNAL_ID_PREFIX}{raw}"))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Local(id) => write!(f, "{id}"),
            RecordId::External(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedClient {
    pub id: RecordId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedAppointment {
    pub id: RecordId,
    pub client_id: i64,
    pub time: DateTime<Utc>,
    pub origin: Origin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ann@X.COM \n"), "ann@x.com");
    }

    #[test]
    fn remote_client_tolerates_loose_shapes() {
        let c: RemoteClient = serde_json::from_value(json!({
            "id": 3,
            "email": "a@x.com",
            "phone": 5551234567_i64,
            "created_at": "whatever"
        }))
        .unwrap();
        assert_eq!(c.name, "");
        assert_eq!(c.phone, "5551234567");
        assert_eq!(c.id, Some(json!(3)));
    }

    #[test]
    fn remote_client_requires_email() {
        let r: Result<RemoteClient, _> = serde_json::from_value(json!({"name": "Ann"}));
        assert!(r.is_err());
    }

    #[test]
    fn remote_appointment_accepts_string_client_id() {
        let a: RemoteAppointment = serde_json::from_value(json!({
            "client_id": "7",
            "time": "2025-07-18T09:00:00Z"
        }))
        .unwrap();
        assert_eq!(a.client_id, 7);
        assert_eq!(a.time.to_rfc3339(), "2025-07-18T09:00:00+00:00");
    }

    #[test]
    fn record_ids_serialize_without_tags() {
        assert_eq!(serde_json::to_value(RecordId::Local(42)).unwrap(), json!(42));
        assert_eq!(
            serde_json::to_value(RecordId::external(Some(&json!(42)), 0)).unwrap(),
            json!("ext-42")
        );
        assert_eq!(
            RecordId::external(None, 3),
            RecordId::External("ext-#3".to_string())
        );
    }

    #[test]
    fn new_client_validation_matches_create_rules() {
        assert!(NewClient::new("Ann Lee", "ann@x.com", "5550100200").validation_errors().is_empty());

        let errs = NewClient::new("A", "not-an-email", "123").validation_errors();
        assert_eq!(
            errs,
            vec![
                "Name must be at least 2 characters",
                "Email must be a valid email address",
                "Phone must be at least 10 digits",
            ]
        );

        let errs = NewClient::new(" ", "", "").validation_errors();
        assert_eq!(errs.len(), 3);
        assert!(errs.iter().all(|e| e.ends_with("is required")));
    }

    #[test]
    fn appointment_must_be_in_the_future() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 7, 17, 12, 0, 0).unwrap();
        let past = NewAppointment { client_id: 1, time: now };
        assert_eq!(past.validation_errors(now), vec!["Time must be in the future"]);
        let future = NewAppointment {
            client_id: 1,
            time: now + chrono::Duration::minutes(1),
        };
        assert!(future.validation_errors(now).is_empty());
    }

    #[test]
    fn origin_serializes_snake_case() {
        assert_eq!(serde_json::to_value(Origin::External).unwrap(), json!("external"));
    }
}
