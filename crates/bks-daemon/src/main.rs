//! bks-daemon entry point.
//!
//! Thin by design: tracing, config, Postgres, the gateway, background tasks
//! (push worker, periodic sync, heartbeat), middleware and the HTTP server.
//! Route handlers live in `routes.rs`; shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use bks_daemon::{routes, state};
use bks_db::PgStore;
use bks_remote::HttpGateway;
use bks_runtime::{spawn_push_worker, PushHandle, PushWorker};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

/// Comma-separated YAML paths, merged in order.
const ENV_CONFIG_PATHS: &str = "BKS_CONFIG_PATHS";
const ENV_DAEMON_ADDR: &str = "BKS_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = bks_config::load_layered_yaml_with_env(&path_refs, bks_config::process_env)
        .context("config load failed")?;
    let cfg = loaded.app_config()?;
    info!(config_hash = %loaded.config_hash, sync = ?cfg.sync, "config loaded");

    let pool = bks_db::connect_from_env().await?;
    bks_db::migrate(&pool).await?;
    let store = Arc::new(PgStore::new(pool));
    let gateway = Arc::new(HttpGateway::new(&cfg.sync)?);

    let push = PushHandle::new();
    let shared = Arc::new(state::AppState::new(
        store.clone(),
        store.clone(),
        gateway.clone(),
        push.clone(),
    ));
    let shutdown = shared.shutdown.clone();

    let push_task = spawn_push_worker(
        PushWorker::new(store, gateway, cfg.push.clone(), push),
        shutdown.clone(),
    );
    let heartbeat_task =
        state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1), shutdown.clone());
    let sync_task = match cfg.sync.interval() {
        Some(every) => {
            info!(interval_secs = every.as_secs(), "periodic sync enabled");
            Some(state::spawn_sync_tick(Arc::clone(&shared), every))
        }
        None => {
            info!("periodic sync off; on-demand only");
            None
        }
    };

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("bks-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server crashed")?;

    let _ = push_task.await;
    let _ = heartbeat_task.await;
    if let Some(t) = sync_task {
        let _ = t.await;
    }
    info!("bks-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn config_paths_from_env() -> Vec<String> {
    bks_config::process_env(ENV_CONFIG_PATHS)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(ENV_DAEMON_ADDR).ok()?.parse().ok()
}

/// Resolves on ctrl-c and cancels background work.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl-c handler failed; shutting down");
    }
    info!("shutdown requested");
    shutdown.cancel();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
