//! reqwest-backed gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bks_config::{redact_url, SyncConfig};
use bks_schemas::{NewAppointment, NewClient, RemoteAppointment, RemoteClient};
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::envelope::{decode_items, normalize_body, normalize_collection};
use crate::gateway::{GatewayError, PushResult, RemoteGateway};

const CLIENTS_PATH: &str = "/clients";
const APPOINTMENTS_PATH: &str = "/appointments";

/// Stateless per call. One `reqwest::Client` carries the request and connect
/// timeouts from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    /// `None` when sync is disabled; every call then short-circuits.
    base_url: Option<String>,
}

impl HttpGateway {
    pub fn new(cfg: &SyncConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .connect_timeout(cfg.connect_timeout())
            .build()
            .context("failed to build remote http client")?;
        let base_url = cfg.active_base_url().map(str::to_string);
        match &base_url {
            Some(url) => info!(base_url = %redact_url(url), "remote gateway enabled"),
            None => info!("remote gateway disabled"),
        }
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> Result<String, GatewayError> {
        self.base_url
            .as_deref()
            .map(|base| format!("{base}{path}"))
            .ok_or(GatewayError::Disabled)
    }

    async fn get_json(&self, path: &str) -> Result<Value, GatewayError> {
        let url = self.url(path)?;
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;
        read_json(resp).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, GatewayError> {
        let url = self.url(path)?;
        let resp = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        read_json(resp).await
    }

    async fn fetch_collection(&self, path: &str) -> Vec<Value> {
        match self.get_json(path).await {
            Ok(body) => {
                let items = normalize_collection(body, path);
                info!(op = path, fetched = items.len(), "fetched remote records");
                items
            }
            Err(e) => {
                e.log(path);
                Vec::new()
            }
        }
    }

    async fn create(&self, path: &str, body: Value) -> PushResult {
        let raw = self.post_json(path, &body).await?;
        // 2xx with an empty body: accepted, nothing to report back.
        let payload = if raw.is_null() {
            Value::Null
        } else {
            normalize_body(raw)?
        };
        debug!(op = path, payload = %payload, "created record on remote");
        Ok(payload)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    async fn fetch_clients(&self) -> Vec<RemoteClient> {
        let items = self.fetch_collection(CLIENTS_PATH).await;
        decode_items(items, CLIENTS_PATH)
    }

    async fn fetch_appointments(&self) -> Vec<RemoteAppointment> {
        let items = self.fetch_collection(APPOINTMENTS_PATH).await;
        decode_items(items, APPOINTMENTS_PATH)
    }

    async fn create_client(&self, client: &NewClient) -> PushResult {
        self.create(CLIENTS_PATH, json!({ "client": client })).await
    }

    async fn create_appointment(&self, appointment: &NewAppointment) -> PushResult {
        self.create(APPOINTMENTS_PATH, json!({ "appointment": appointment }))
            .await
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.url(CLIENTS_PATH) else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                transport(e).log("health_check");
                false
            }
        }
    }
}

/// Status check, then text, then JSON. Reading text first lets a body that is
/// a JSON string reach envelope normalization instead of failing here.
async fn read_json(resp: reqwest::Response) -> Result<Value, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(GatewayError::Status(status.as_u16()));
    }
    let text = resp.text().await.map_err(transport)?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| GatewayError::Malformed(format!("response body is not JSON: {e}")))
}

/// URLs are stripped from reqwest errors; base URLs may carry credentials.
fn transport(e: reqwest::Error) -> GatewayError {
    let timed_out = e.is_timeout();
    let e = e.without_url();
    if timed_out {
        GatewayError::Transport(format!("timed out: {e}"))
    } else {
        GatewayError::Transport(e.to_string())
    }
}
