//! bks-config
//!
//! Layered YAML configuration for the booking-sync workspace.
//!
//! Contract:
//! - YAML documents are deep-merged in order: earlier docs are base, later docs override.
//! - Environment overrides (`BKS_SYNC_ENABLED`, `BKS_REMOTE_URL`) are applied last, once,
//!   through an injected lookup. Business logic never reads the environment.
//! - The merged document is hashed (SHA-256 over canonical JSON) so every process can log
//!   exactly which configuration it booted with.
//! - The typed [`AppConfig`] is built from the merged document and passed by reference
//!   into the gateway, reconciler and push worker.

mod settings;

pub use settings::{redact_url, AppConfig, PushPolicy, SyncConfig};

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs;

/// Sync feature flag. Only the exact string `true` enables sync.
pub const ENV_SYNC_ENABLED: &str = "BKS_SYNC_ENABLED";
/// Remote service base URL. Empty means unset.
pub const ENV_REMOTE_URL: &str = "BKS_REMOTE_URL";

/// Values that look like credentials are refused as literal config values.
/// Config files may name env vars; they must not carry the secrets themselves.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "glpat-",
    "xoxb-",
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed view of the merged document. Missing sections fall back to defaults.
    pub fn app_config(&self) -> Result<AppConfig> {
        serde_json::from_value(self.config_json.clone()).context("config does not match schema")
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    load_layered_yaml_with_env(paths, |_| None)
}

/// Read YAML files in merge order, then apply environment overrides from `lookup`.
///
/// Binaries pass [`process_env`]; tests pass a closure over a fixed map.
pub fn load_layered_yaml_with_env<F>(paths: &[&str], lookup: F) -> Result<LoadedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_from_strings_with_env(&doc_refs, lookup)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    load_from_strings_with_env(yaml_docs, |_| None)
}

pub fn load_from_strings_with_env<F>(yaml_docs: &[&str], lookup: F) -> Result<LoadedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        // An empty document parses as null; treat it as "no overrides".
        if !v_json.is_null() {
            merged = deep_merge(merged, v_json);
        }
    }

    merged = deep_merge(merged, env_overlay(&lookup));

    enforce_no_secret_literals(&merged, "")?;

    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Process environment lookup for binaries. Empty values count as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Build the override document from the recognized environment variables.
/// Variables that are absent produce no keys, so YAML values survive.
fn env_overlay<F>(lookup: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut sync = Map::new();
    if let Some(flag) = lookup(ENV_SYNC_ENABLED) {
        sync.insert("enabled".to_string(), Value::Bool(flag.trim() == "true"));
    }
    if let Some(url) = lookup(ENV_REMOTE_URL) {
        let url = url.trim();
        let v = if url.is_empty() {
            Value::Null
        } else {
            Value::String(url.to_string())
        };
        sync.insert("base_url".to_string(), v);
    }

    if sync.is_empty() {
        json!({})
    } else {
        json!({ "sync": Value::Object(sync) })
    }
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value, pointer: &str) -> Result<()> {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                enforce_no_secret_literals(vv, &format!("{pointer}/{k}"))?;
            }
        }
        Value::Array(items) => {
            for (i, vv) in items.iter().enumerate() {
                enforce_no_secret_literals(vv, &format!("{pointer}/{i}"))?;
            }
        }
        Value::String(s) if looks_like_secret(s) => {
            bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", pointer);
        }
        _ => {}
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
