//! `bks push drain` / `bks push status`.

use std::sync::Arc;

use anyhow::Result;
use bks_db::PushQueue;
use bks_remote::HttpGateway;
use bks_runtime::{PushHandle, PushWorker};
use chrono::Utc;

use super::{load_config, open_store};

/// One drain of everything due now, outside the daemon.
pub async fn drain(config_paths: &[String]) -> Result<()> {
    let (_, cfg) = load_config(config_paths)?;
    let store = open_store().await?;
    let gateway = Arc::new(HttpGateway::new(&cfg.sync)?);

    let worker = PushWorker::new(store, gateway, cfg.push, PushHandle::new());
    let r = worker.drain(Utc::now()).await?;
    println!(
        "claimed={} sent={} retried={} dead={} released={}",
        r.claimed, r.sent, r.retried, r.dead, r.released
    );
    Ok(())
}

pub async fn status() -> Result<()> {
    let store = open_store().await?;
    let c = store.counts().await?;
    println!(
        "pending={} claimed={} sent={} dead={}",
        c.pending, c.claimed, c.sent, c.dead
    );
    Ok(())
}
