use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use otdr_types::{FilterPatch, ParserErrorBody, Trace};
use serde_json::{json, Value};
use socketioxide::extract::{Data, SocketRef};
use socketioxide::SocketIo;
use tracing::{debug, info, warn};

use crate::ingest::{FileUpload, IngestError, Ingestor, SharedStore};
use crate::parser_client::ParserError;
use crate::state::{StoreSnapshot, StoreState};

// ─── Shared App State ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub ingestor: Arc<Ingestor>,
    pub io: SocketIo,
}

// ─── HTTP Errors ──────────────────────────────────────────────────────────────

/// Error reply with the same `{ "error": ... }` body the parser service uses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ParserErrorBody { error: self.message })).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let status = match &e {
            IngestError::Parser(
                ParserError::Transport(_) | ParserError::Status(_) | ParserError::Malformed(_),
            ) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, e.to_string())
    }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router(app: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/upload", post(upload))
        .route("/api/traces", get(list_traces))
        .route("/api/traces/:id", get(get_trace))
        .route("/api/traces/:id/markers", get(get_markers))
        .route("/api/state", get(get_state))
        .route("/api/comparison", get(list_comparison))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(app)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_traces(State(app): State<AppState>) -> Json<Vec<Trace>> {
    let store = app.store.read().await;
    Json(store.filtered_traces().into_iter().cloned().collect())
}

async fn get_trace(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Trace>, ApiError> {
    let store = app.store.read().await;
    store
        .trace(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Trace {id} not found")))
}

async fn get_markers(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let store = app.store.read().await;
    let trace = store
        .trace(&id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Trace {id} not found")))?;
    Ok(Json(json!(trace.event_markers())))
}

async fn list_comparison(State(app): State<AppState>) -> Json<Vec<Trace>> {
    let store = app.store.read().await;
    Json(store.comparison_traces().into_iter().cloned().collect())
}

async fn get_state(State(app): State<AppState>) -> Json<Value> {
    Json(json!(app.store.read().await.snapshot()))
}

// ── POST /api/upload ──────────────────────────────────────────────────────────

async fn upload(State(app): State<AppState>, mut multipart: Multipart) -> Result<Json<Trace>, ApiError> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("Malformed upload: {e}"))
    };

    let mut file: Option<FileUpload> = None;
    let mut prebuilt: Option<Trace> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(bad_request)?;
                file = Some(FileUpload { file_name, bytes: bytes.to_vec() });
            }
            Some("trace") => {
                let text = field.text().await.map_err(bad_request)?;
                let trace = serde_json::from_str::<Trace>(&text).map_err(|e| {
                    ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, format!("Invalid trace part: {e}"))
                })?;
                prebuilt = Some(trace);
            }
            other => debug!("Upload: ignoring multipart field {other:?}"),
        }
    }

    let file = file.ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No file part in the request"))?;
    if file.file_name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No file selected"));
    }

    info!("Upload: {} ({} bytes)", file.file_name, file.size());

    // Own task: a client that hangs up must not leave the store busy
    let AppState { store, ingestor, io } = app;
    let task = tokio::spawn(async move {
        let notify = move |snapshot: StoreSnapshot| broadcast_state(&io, &snapshot);
        ingestor.ingest(&store, file, prebuilt, &notify).await
    });
    let result = task.await.map_err(|e| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Ingest task failed: {e}"))
    })?;

    Ok(Json(result?))
}

/// `state-update` to every client on the default namespace.
pub fn broadcast_state(io: &SocketIo, snapshot: &StoreSnapshot) {
    match io.of("/") {
        Some(ns) => {
            let _ = ns.emit("state-update", snapshot);
        }
        None => debug!("No socket namespace yet, state-update skipped"),
    }
}

// ─── Socket Commands ──────────────────────────────────────────────────────────

type Command = fn(&mut StoreState, &Value);

/// Socket events that mutate the store. Each one is followed by a
/// `state-update` broadcast.
pub const COMMANDS: &[(&str, Command)] = &[
    ("select-trace", select_trace),
    ("add-to-comparison", add_to_comparison),
    ("remove-from-comparison", remove_from_comparison),
    ("toggle-comparison-mode", toggle_comparison_mode),
    ("clear-comparison", clear_comparison),
    ("update-filters", update_filters),
    ("reset-filters", reset_filters),
];

/// Accept both a bare string (`"2"`) and an object (`{ id: "2" }`).
fn id_arg(data: &Value) -> Option<&str> {
    data.as_str().or_else(|| data["id"].as_str())
}

fn select_trace(state: &mut StoreState, data: &Value) {
    // null / missing id clears the selection
    state.select(id_arg(data).unwrap_or_default());
}

fn add_to_comparison(state: &mut StoreState, data: &Value) {
    if let Some(id) = id_arg(data) {
        state.add_to_comparison(id);
    }
}

fn remove_from_comparison(state: &mut StoreState, data: &Value) {
    if let Some(id) = id_arg(data) {
        state.remove_from_comparison(id);
    }
}

fn toggle_comparison_mode(state: &mut StoreState, _data: &Value) {
    state.toggle_comparison_mode();
}

fn clear_comparison(state: &mut StoreState, _data: &Value) {
    state.clear_comparison();
}

/// Accept both `{ patch: {...} }` and the patch object itself.
fn update_filters(state: &mut StoreState, data: &Value) {
    let raw = data.get("patch").unwrap_or(data);
    match serde_json::from_value::<FilterPatch>(raw.clone()) {
        Ok(patch) => state.update_filters(patch),
        Err(e) => warn!("Failed to parse update-filters payload: {e} | Raw Data: {data}"),
    }
}

fn reset_filters(state: &mut StoreState, _data: &Value) {
    state.reset_filters();
}

// ─── Main Connection Handler ──────────────────────────────────────────────────

pub async fn on_connect(socket: SocketRef, store: SharedStore) {
    let socket_id = socket.id.to_string();
    info!("Client connected: {socket_id}");

    socket.on_disconnect(|s: SocketRef| async move {
        info!("Client disconnected: {}", s.id);
    });

    {
        let snapshot = store.read().await.snapshot();
        let _ = socket.emit("init-state", &snapshot);
    }

    for &(event, command) in COMMANDS {
        let store = store.clone();
        socket.on(event, move |s: SocketRef, Data::<Value>(data)| {
            let store = store.clone();
            async move {
                let snapshot = {
                    let mut state = store.write().await;
                    command(&mut state, &data);
                    state.snapshot()
                };
                debug!("{event} from {}", s.id);
                let _ = s.broadcast().emit("state-update", &snapshot);
                let _ = s.emit("state-update", &snapshot);
            }
        });
    }

    info!("All handlers registered for socket {socket_id}");
}
