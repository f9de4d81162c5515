//! Axum router and all HTTP handlers for bks-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Reads return the merged local + remote view; creates
//! write locally, commit a push outbox row in the same transaction and poke
//! the push worker. No handler waits on the remote service for a create.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use bks_db::StoreError;
use bks_reconcile::{merge_appointments, merge_clients};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::{
    api_types::{
        ApiResponse, AppointmentQuery, CreateAppointmentRequest, CreateClientRequest,
        HealthResponse, SyncStatusResponse,
    },
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/clients", get(list_clients).post(create_client))
        .route(
            "/v1/appointments",
            get(list_appointments).post(create_appointment),
        )
        .route("/v1/sync/run", post(sync_run))
        .route("/v1/sync/status", get(sync_status))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

fn reply<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}

fn refuse(status: StatusCode, errors: Vec<String>) -> Response {
    reply::<()>(status, ApiResponse::fail(errors))
}

/// Unreadable or incomplete request bodies get the failure envelope too.
fn json_body<T>(req: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match req {
        Ok(Json(v)) => Ok(v),
        Err(rejection) => {
            info!(error = %rejection.body_text(), "request body rejected");
            Err(refuse(StatusCode::BAD_REQUEST, vec![rejection.body_text()]))
        }
    }
}

/// Map a store failure on the write path to a status code. Backend errors are
/// logged here and hidden from the caller.
fn store_failure(e: StoreError, conflict_msg: &str, what: &str) -> Response {
    match e {
        StoreError::Conflict(detail) => {
            info!(%detail, "{what} rejected: duplicate");
            refuse(StatusCode::CONFLICT, vec![conflict_msg.to_string()])
        }
        StoreError::MissingReference(detail) => {
            info!(%detail, "{what} rejected: unknown client");
            refuse(
                StatusCode::UNPROCESSABLE_ENTITY,
                vec!["Client must exist".to_string()],
            )
        }
        StoreError::NotFound(detail) => refuse(StatusCode::NOT_FOUND, vec![detail]),
        StoreError::Backend(err) => {
            error!(error = %format!("{err:#}"), "{what} failed");
            refuse(
                StatusCode::INTERNAL_SERVER_ERROR,
                vec!["internal error".to_string()],
            )
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

/// 503 when the database is down, or when sync is on and the remote does not answer.
pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let database = st.store.ping().await;
    let sync_enabled = st.gateway.is_enabled();
    let remote_sync = st.gateway.health_check().await;
    let ok = database && (remote_sync || !sync_enabled);

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            ok,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            database,
            sync_enabled,
            remote_sync,
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/clients  GET /v1/appointments
// ---------------------------------------------------------------------------

pub(crate) async fn list_clients(State(st): State<Arc<AppState>>) -> Response {
    let local = match st.store.list_clients().await {
        Ok(v) => v,
        Err(e) => return store_failure(e, "", "list clients"),
    };
    // Degrades to empty on any remote failure; the view is then local-only.
    let remote = st.gateway.fetch_clients().await;
    let merged = merge_clients(&local, &remote);
    reply(StatusCode::OK, ApiResponse::ok(merged))
}

pub(crate) async fn list_appointments(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AppointmentQuery>,
) -> Response {
    let local = match st.store.list_appointments(q.client_id).await {
        Ok(v) => v,
        Err(e) => return store_failure(e, "", "list appointments"),
    };
    let mut remote = st.gateway.fetch_appointments().await;
    if let Some(client_id) = q.client_id {
        remote.retain(|a| a.client_id == client_id);
    }
    let merged = merge_appointments(&local, &remote);
    reply(StatusCode::OK, ApiResponse::ok(merged))
}

// ---------------------------------------------------------------------------
// POST /v1/clients  POST /v1/appointments
// ---------------------------------------------------------------------------

pub(crate) async fn create_client(
    State(st): State<Arc<AppState>>,
    req: Result<Json<CreateClientRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let errors = req.client.validation_errors();
    if !errors.is_empty() {
        return refuse(StatusCode::UNPROCESSABLE_ENTITY, errors);
    }

    match st.store.create_client(&req.client).await {
        Ok(client) => {
            st.push.notify();
            info!(id = client.id, email = %client.email, "client created; push queued");
            reply(
                StatusCode::CREATED,
                ApiResponse::ok(client).with_message("Client created successfully"),
            )
        }
        Err(e) => store_failure(e, "Email is already registered", "create client"),
    }
}

pub(crate) async fn create_appointment(
    State(st): State<Arc<AppState>>,
    req: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let errors = req.appointment.validation_errors(Utc::now());
    if !errors.is_empty() {
        return refuse(StatusCode::UNPROCESSABLE_ENTITY, errors);
    }

    match st.store.create_appointment(&req.appointment).await {
        Ok(appointment) => {
            st.push.notify();
            info!(
                id = appointment.id,
                client_id = appointment.client_id,
                time = %appointment.time,
                "appointment created; push queued"
            );
            reply(
                StatusCode::CREATED,
                ApiResponse::ok(appointment).with_message("Appointment created successfully"),
            )
        }
        Err(e) => store_failure(
            e,
            "Client already has an appointment at this time",
            "create appointment",
        ),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/sync/run  GET /v1/sync/status
// ---------------------------------------------------------------------------

pub(crate) async fn sync_run(State(st): State<Arc<AppState>>) -> Response {
    match st.run_sync().await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => refuse(
            StatusCode::CONFLICT,
            vec!["sync already running".to_string()],
        ),
    }
}

pub(crate) async fn sync_status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let last_report = st.last_sync.read().await.clone();
    let push = match st.queue.counts().await {
        Ok(c) => Some(c),
        Err(e) => {
            error!(error = %e, "push queue counts failed");
            None
        }
    };
    (
        StatusCode::OK,
        Json(SyncStatusResponse {
            sync_enabled: st.gateway.is_enabled(),
            last_report,
            push,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Sync(_) => "sync",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
