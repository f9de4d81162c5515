//! `bks sync run` / `bks sync health`.

use std::sync::Arc;

use anyhow::Result;
use bks_remote::{HttpGateway, RemoteGateway};
use bks_runtime::Reconciler;

use super::{cancel_on_ctrl_c, load_config, open_store, print_json};

pub async fn run(config_paths: &[String], json: bool) -> Result<()> {
    let (loaded, cfg) = load_config(config_paths)?;
    tracing::info!(config_hash = %loaded.config_hash, "config loaded");

    let store = open_store().await?;
    let gateway = Arc::new(HttpGateway::new(&cfg.sync)?);
    let reconciler = Reconciler::new(store, gateway);

    let report = reconciler.run(&cancel_on_ctrl_c()).await;
    if json {
        return print_json(&report);
    }

    // {"status": .., "reason": ..}
    let outcome = serde_json::to_value(&report.outcome)?;
    println!("outcome={}", outcome["status"].as_str().unwrap_or("unknown"));
    if let Some(reason) = outcome["reason"].as_str() {
        println!("reason={reason}");
    }
    let c = &report.clients;
    println!(
        "clients fetched={} created={} updated={} unchanged={} failed={}",
        c.fetched, c.created, c.updated, c.unchanged, c.failed
    );
    let a = &report.appointments;
    println!(
        "appointments fetched={} created={} present={} failed={}",
        a.fetched, a.created, a.present, a.failed
    );
    Ok(())
}

pub async fn health(config_paths: &[String]) -> Result<()> {
    let (_, cfg) = load_config(config_paths)?;
    let gateway = HttpGateway::new(&cfg.sync)?;
    let healthy = gateway.health_check().await;
    println!(
        "sync_enabled={} remote_healthy={}",
        gateway.is_enabled(),
        healthy
    );
    Ok(())
}
