//! Command handler modules for bks-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod push;
pub mod remind;
pub mod sync;

use std::sync::Arc;

use anyhow::{Context, Result};
use bks_config::{AppConfig, LoadedConfig};
use bks_db::PgStore;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Layered YAML from `paths` plus process environment overrides, the same way
/// the daemon boots.
pub fn load_config(paths: &[String]) -> Result<(LoadedConfig, AppConfig)> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = bks_config::load_layered_yaml_with_env(&path_refs, bks_config::process_env)?;
    let cfg = loaded.app_config()?;
    Ok((loaded, cfg))
}

pub async fn open_store() -> Result<Arc<PgStore>> {
    let pool = bks_db::connect_from_env().await?;
    Ok(Arc::new(PgStore::new(pool)))
}

/// Token cancelled on ctrl-c, so a long pass stops between records.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("ctrl-c: cancelling");
            t.cancel();
        }
    });
    token
}

pub fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(v).context("json serialize failed")?;
    println!("{s}");
    Ok(())
}
