//! Response envelope normalization.
//!
//! The remote service answers with several shapes: a bare array, a
//! `{data: ...}` or `{success, data}` wrapper, a bare object, or any of those
//! serialized a second time as a JSON string. [`Envelope::classify`] maps a
//! decoded body onto a closed set of variants and [`normalize_body`] dispatches
//! on them exhaustively.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::gateway::GatewayError;

/// How many times a string body is decoded as JSON before giving up.
pub const MAX_TEXT_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Bare collection; returned as-is.
    Array(Vec<Value>),
    /// Value of a present, truthy `data` field.
    Data(Value),
    /// Keyed structure without usable `data`; the whole object is the payload.
    Object(Map<String, Value>),
    /// Body that was itself a JSON string; decode and classify again.
    Text(String),
    /// Anything else (`null`, numbers, booleans).
    Unrecognized(&'static str),
}

impl Envelope {
    pub fn classify(body: Value) -> Self {
        match body {
            Value::Array(items) => Envelope::Array(items),
            Value::Object(mut map) => match map.remove("data") {
                Some(data) if is_truthy(&data) => Envelope::Data(data),
                Some(data) => {
                    map.insert("data".to_string(), data);
                    Envelope::Object(map)
                }
                None => Envelope::Object(map),
            },
            Value::String(raw) => Envelope::Text(raw),
            Value::Null => Envelope::Unrecognized("null"),
            Value::Bool(_) => Envelope::Unrecognized("boolean"),
            Value::Number(_) => Envelope::Unrecognized("number"),
        }
    }
}

/// `data: null` and `data: false` count as absent.
fn is_truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

/// Reduce a response body to its payload.
pub fn normalize_body(body: Value) -> Result<Value, GatewayError> {
    let mut current = body;
    let mut depth = 0;
    loop {
        match Envelope::classify(current) {
            Envelope::Array(items) => return Ok(Value::Array(items)),
            Envelope::Data(data) => return Ok(data),
            Envelope::Object(map) => return Ok(Value::Object(map)),
            Envelope::Text(raw) if depth < MAX_TEXT_DEPTH => {
                depth += 1;
                current = serde_json::from_str(&raw).map_err(|e| {
                    GatewayError::Malformed(format!("string body is not JSON: {e}"))
                })?;
            }
            Envelope::Text(_) => {
                return Err(GatewayError::UnexpectedShape(format!(
                    "JSON string nested deeper than {MAX_TEXT_DEPTH}"
                )))
            }
            Envelope::Unrecognized(kind) => {
                return Err(GatewayError::UnexpectedShape(kind.to_string()))
            }
        }
    }
}

/// Fetch-path normalization: always a sequence, failures logged and empty.
///
/// A payload that is not an array (a bare object, or `data` holding an
/// object) is treated as a single element.
pub fn normalize_collection(body: Value, op: &str) -> Vec<Value> {
    match normalize_body(body) {
        Ok(Value::Array(items)) => items,
        Ok(other) => vec![other],
        Err(e) => {
            e.log(op);
            Vec::new()
        }
    }
}

/// Decode each element independently; elements that do not fit `T` are
/// skipped with a warning so well-formed siblings survive.
pub fn decode_items<T: DeserializeOwned>(items: Vec<Value>, op: &str) -> Vec<T> {
    let total = items.len();
    let mut out = Vec::with_capacity(total);
    for (pos, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(item) {
            Ok(v) => out.push(v),
            Err(e) => warn!(op, pos, error = %e, "skipping undecodable remote record"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_covers_every_json_kind() {
        assert!(matches!(Envelope::classify(json!([1])), Envelope::Array(_)));
        assert!(matches!(
            Envelope::classify(json!({"data": [1]})),
            Envelope::Data(_)
        ));
        assert!(matches!(
            Envelope::classify(json!({"id": 1})),
            Envelope::Object(_)
        ));
        assert!(matches!(Envelope::classify(json!("[]")), Envelope::Text(_)));
        assert_eq!(Envelope::classify(json!(null)), Envelope::Unrecognized("null"));
        assert_eq!(Envelope::classify(json!(3)), Envelope::Unrecognized("number"));
        assert_eq!(
            Envelope::classify(json!(true)),
            Envelope::Unrecognized("boolean")
        );
    }

    #[test]
    fn null_data_is_an_opaque_object() {
        let body = json!({"success": true, "data": null});
        assert_eq!(normalize_body(body.clone()).unwrap(), body);
    }

    #[test]
    fn success_wrapper_unwraps_data() {
        let body = json!({"success": true, "data": {"id": 9}});
        assert_eq!(normalize_body(body).unwrap(), json!({"id": 9}));
    }

    #[test]
    fn all_collection_shapes_agree() {
        let items = json!([{"email": "a@x.com"}, {"email": "b@x.com"}]);
        let wrapped = json!({ "data": items.clone() });
        let as_text = Value::String(items.to_string());
        let wrapped_text = Value::String(wrapped.to_string());

        let expected = normalize_collection(items, "t");
        assert_eq!(expected.len(), 2);
        assert_eq!(normalize_collection(wrapped, "t"), expected);
        assert_eq!(normalize_collection(as_text, "t"), expected);
        assert_eq!(normalize_collection(wrapped_text, "t"), expected);
    }

    #[test]
    fn bare_object_becomes_single_element() {
        let out = normalize_collection(json!({"email": "a@x.com"}), "t");
        assert_eq!(out, vec![json!({"email": "a@x.com"})]);
    }

    #[test]
    fn unparseable_text_is_malformed() {
        let err = normalize_body(json!("not json {")).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
        assert!(normalize_collection(json!("not json {"), "t").is_empty());
    }

    #[test]
    fn text_recursion_is_bounded() {
        let mut body = json!([]);
        for _ in 0..=MAX_TEXT_DEPTH {
            body = Value::String(body.to_string());
        }
        let err = normalize_body(body).unwrap_err();
        assert!(matches!(err, GatewayError::UnexpectedShape(_)));
    }

    #[test]
    fn decode_skips_bad_siblings() {
        #[derive(serde::Deserialize)]
        struct Row {
            email: String,
        }
        let rows: Vec<Row> = decode_items(
            vec![json!({"email": "a@x.com"}), json!({"name": "no email"}), json!(7)],
            "t",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].email, "a@x.com");
    }
}
