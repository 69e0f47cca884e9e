//
// web.rs
// Dicom-Courier-rs
//
// Axum-based HTTP control surface: queue status and listing, enqueue, retry and
// cancel, live status events, destination settings and echo, client statistics.
//
// Dicom-Courier-rs contributors - October 2026

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::{
    batch,
    client::{ClientStats, DimseClient, Outcome},
    config::AppConfig,
    error::{ConfigError, QueueError},
    models::{
        DestinationConfig, PatientSummary, Priority, QueueItem, QueueSummary, Status, StatusEvent,
    },
    queue::DeliveryQueue,
    storage::OutputStore,
};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<DeliveryQueue>,
    pub client: Arc<DimseClient>,
    /// The queue holds a receiver of this channel and reads it on every attempt.
    pub destination: Arc<watch::Sender<DestinationConfig>>,
    /// Loaded configuration, rewritten whole when the destination changes.
    pub config: Arc<Mutex<AppConfig>>,
    pub config_path: PathBuf,
    pub store: OutputStore,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/queue/status", get(status_handler))
        .route("/api/queue/events", get(events_handler))
        .route("/api/queue/items", get(list_handler).post(enqueue_handler))
        .route("/api/queue/items/:id", get(item_handler))
        .route("/api/queue/items/:id/retry", post(retry_handler))
        .route("/api/queue/items/:id/cancel", post(cancel_handler))
        .route(
            "/api/destination",
            get(destination_handler).put(update_destination_handler),
        )
        .route("/api/destination/echo", get(echo_handler))
        .route("/api/client/stats", get(stats_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Serve the API until the listener fails.
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "control API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn status_handler(State(state): State<AppState>) -> Json<QueueSummary> {
    Json(state.queue.status().await)
}

/// One `status` server-sent event per queue transition.
async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = status_events(state.queue.subscribe())
        .map(|event| Event::default().event("status").json_data(event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Events for one subscriber. A reader too slow for the channel skips what it missed.
fn status_events(events: broadcast::Receiver<StatusEvent>) -> impl Stream<Item = StatusEvent> {
    BroadcastStream::new(events).filter_map(|event| match event {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!(missed, "status subscriber fell behind");
            None
        }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<QueueItem>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<Status>)
        .transpose()
        .map_err(bad_request)?;
    Ok(Json(state.queue.list(status, query.limit).await))
}

async fn item_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<QueueItem>> {
    state
        .queue
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(QueueError::ItemNotFound(id)))
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    /// File name inside the output directory.
    file: String,
    #[serde(default)]
    priority: Priority,
    #[serde(flatten)]
    summary: PatientSummary,
}

async fn enqueue_handler(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let path: PathBuf = state.store.resolve(&request.file).map_err(not_found)?;
    // read the display fields from the file unless the caller supplied them
    let summary = if request.summary == PatientSummary::default() {
        batch::summary_of(&path).unwrap_or_default()
    } else {
        request.summary
    };
    let id = state
        .queue
        .enqueue(&path, summary, request.priority)
        .await
        .map_err(queue_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn retry_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.queue.retry(&id).await.map_err(queue_error)?;
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.queue.cancel(&id).await.map_err(queue_error)?;
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn destination_handler(State(state): State<AppState>) -> Json<DestinationConfig> {
    Json(state.destination.borrow().clone())
}

/// Persist new destination settings, then hand them to the running queue.
async fn update_destination_handler(
    State(state): State<AppState>,
    Json(destination): Json<DestinationConfig>,
) -> ApiResult<Json<DestinationConfig>> {
    destination.validate().map_err(config_error)?;

    // held across the send so concurrent updates reach the queue in save order
    let mut config = state.config.lock().await;
    let mut updated = config.clone();
    updated.destination = destination.clone();
    updated.save(&state.config_path).map_err(config_error)?;
    *config = updated;
    state.destination.send_replace(destination.clone());
    drop(config);

    info!(destination = %destination, "destination updated");
    Ok(Json(destination))
}

async fn echo_handler(State(state): State<AppState>) -> Json<Value> {
    let destination = state.destination.borrow().clone();
    if !destination.enabled {
        return Json(json!({ "success": false, "error": "destination is disabled" }));
    }
    match state.client.echo(&destination).await {
        Outcome::Success => Json(json!({
            "success": true,
            "destination": destination.to_string()
        })),
        Outcome::Failure { kind, message } => Json(json!({
            "success": false,
            "destination": destination.to_string(),
            "kind": kind,
            "error": message
        })),
    }
}

async fn stats_handler(State(state): State<AppState>) -> Json<ClientStats> {
    Json(state.client.stats())
}

fn queue_error(err: QueueError) -> (StatusCode, String) {
    let code = match &err {
        QueueError::SourceNotFound(_) | QueueError::ItemNotFound(_) => StatusCode::NOT_FOUND,
        QueueError::InvalidState { .. } | QueueError::Locked(_) => StatusCode::CONFLICT,
        QueueError::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
        QueueError::Persistence(_) | QueueError::Snapshot(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, err.to_string())
}

fn config_error(err: ConfigError) -> (StatusCode, String) {
    let code = match &err {
        ConfigError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, err.to_string())
}

fn bad_request<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn not_found<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, err.to_string())
}
