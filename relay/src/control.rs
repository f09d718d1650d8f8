//! Control Surface (C11): REST endpoints for health, the athlete registry,
//! session lifecycle, and pack export, plus the `/ws` upgrade that hands a
//! client off to the broadcaster. Router shape and CORS setup follow the
//! teacher's `main.rs` (`Router::new().route(...).layer(CorsLayer)`),
//! generalized from one health/sync pair to the full endpoint table.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use relay_wire::{AthleteRecord, Envelope, GateMetricsPayload, MessageType, PositionUpdatePayload};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::RelayError;
use crate::registry::AthleteTable;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/athletes", get(get_athletes).put(put_athletes))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(session_meta))
        .route("/api/sessions/:id/messages", get(session_messages))
        .route("/api/sessions/:id/export", get(session_export))
        .route("/api/sessions/start", post(start_session))
        .route("/api/sessions/stop", post(stop_session))
        .route("/api/start-signal", post(start_signal))
        .route("/ws", get(ws_upgrade))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let athletes_tracked = state.state_table.lock().unwrap().device_ids().len();
    let position_stats = *state.position_parse_stats.lock().unwrap();
    let gate_stats = *state.gate_parse_stats.lock().unwrap();

    Json(json!({
        "status": "ok",
        "uptime_s": state.uptime_s(),
        "position_upstream_connected": state.position_connected.load(Ordering::Relaxed),
        "gate_upstream_connected": state.gate_connected.load(Ordering::Relaxed),
        "connected_clients": state.broadcaster.client_count(),
        "athletes_tracked": athletes_tracked,
        "messages_relayed": state.messages_relayed.load(Ordering::Relaxed),
        "recording": state.recorder.is_recording().await,
        "session_id": state.recorder.current_session_id().await,
        "position_frames_seen": position_stats.seen,
        "position_frames_dropped": position_stats.dropped,
        "gate_frames_seen": gate_stats.seen,
        "gate_frames_dropped": gate_stats.dropped,
    }))
}

async fn get_athletes(State(state): State<Arc<AppState>>) -> Json<Vec<AthleteRecord>> {
    Json(state.registry.snapshot().all())
}

#[derive(Debug, Deserialize)]
struct AthletesDocument {
    athletes: Vec<AthleteRecord>,
}

async fn put_athletes(
    State(state): State<Arc<AppState>>,
    Json(doc): Json<AthletesDocument>,
) -> impl IntoResponse {
    state.registry.replace(AthleteTable::from_records(doc.athletes));
    Json(json!({ "status": "replaced" }))
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, RelayError> {
    Ok(Json(state.recorder.list_sessions().await?))
}

async fn session_meta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    Ok(Json(state.recorder.session_meta(&id).await?))
}

async fn session_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, RelayError> {
    let reader = state.recorder.open_messages(&id).await?;
    let mut lines = reader.lines();
    // The header line is metadata about the pack, not part of the message
    // sequence; skip it before streaming the rest.
    lines.next_line().await?;

    let stream = line_stream(lines);
    let body = axum::body::Body::from_stream(stream);
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "json".to_string()
}

async fn session_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, RelayError> {
    let reader = state.recorder.open_messages(&id).await?;
    let mut lines = reader.lines();
    lines.next_line().await?;

    match query.format.as_str() {
        "json" => {
            let body = axum::body::Body::from_stream(line_stream(lines));
            Ok((
                [(header::CONTENT_TYPE, "application/x-ndjson")],
                body,
            )
                .into_response())
        }
        "csv" => {
            let body = axum::body::Body::from_stream(csv_stream(lines));
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv"),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"export.csv\"",
                    ),
                ],
                body,
            )
                .into_response())
        }
        other => Err(RelayError::BadRequest(format!(
            "unsupported export format '{other}', expected 'csv' or 'json'"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    session_id: Option<String>,
    description: Option<String>,
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StartQuery>,
) -> Result<impl IntoResponse, RelayError> {
    let session_id = state.recorder.start(query.session_id, query.description).await?;
    state.fabricator.set_session_id(Some(session_id.clone()));
    state.state_table.lock().unwrap().reset_all(crate::fabricator::now_ms());
    info!(session_id, "session recording started via control surface");
    Ok(Json(json!({ "session_id": session_id, "status": "recording" })))
}

async fn stop_session(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, RelayError> {
    state.recorder.stop().await?;
    state.fabricator.set_session_id(None);
    Ok(Json(json!({ "status": "idle" })))
}

#[derive(Debug, Deserialize, Default)]
struct StartSignalBody {
    ts_ms: Option<i64>,
}

async fn start_signal(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartSignalBody>>,
) -> impl IntoResponse {
    let ts_ms = body
        .and_then(|Json(b)| b.ts_ms)
        .unwrap_or_else(crate::fabricator::now_ms);
    *state.start_signal_ts_ms.lock().unwrap() = Some(ts_ms);
    info!(ts_ms, "start signal recorded");
    Json(json!({ "start_signal_ts_ms": ts_ms }))
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let (client_id, queue) = state.broadcaster.register();
    let write_timeout = std::time::Duration::from_secs(5);

    let sender_task = tokio::spawn(crate::broadcaster::run_client_sender(
        sink,
        queue,
        write_timeout,
    ));

    // Clients never send meaningful data; drain until they close or error.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        }
    }

    state.broadcaster.unregister(client_id);
    sender_task.abort();
}

fn line_stream(
    mut lines: tokio::io::Lines<tokio::io::BufReader<tokio::fs::File>>,
) -> impl Stream<Item = std::io::Result<Bytes>> {
    futures_util::stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let mut chunk = line.into_bytes();
                    chunk.push(b'\n');
                    return Some((Ok(Bytes::from(chunk)), lines));
                }
                Ok(None) => return None,
                Err(e) => return Some((Err(e), lines)),
            }
        }
    })
}

fn csv_stream(
    lines: tokio::io::Lines<tokio::io::BufReader<tokio::fs::File>>,
) -> impl Stream<Item = std::io::Result<Bytes>> {
    const HEADER: &str = "ts_ms,athlete_id,lat,lon,sog_knots,cog_deg,status,d_perp_signed_m,eta_s\n";
    let initial = (lines, vec![HEADER.to_string()], true);

    futures_util::stream::unfold(initial, |(mut lines, mut pending, first)| async move {
        loop {
            if let Some(row) = pending.pop() {
                return Some((Ok(Bytes::from(row.into_bytes())), (lines, pending, first)));
            }
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Ok(envelope) = serde_json::from_str::<Envelope>(&line) else {
                        continue;
                    };
                    let mut rows = csv_rows_for(&envelope);
                    if rows.is_empty() {
                        continue;
                    }
                    rows.reverse();
                    pending = rows;
                    continue;
                }
                Ok(None) => return None,
                Err(e) => return Some((Err(e), (lines, pending, first))),
            }
        }
    })
}

fn csv_rows_for(envelope: &Envelope) -> Vec<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    match envelope.kind {
        MessageType::PositionUpdate => {
            if let Ok(payload) = serde_json::from_value::<PositionUpdatePayload>(envelope.payload.clone()) {
                for p in &payload.positions {
                    let _ = writer.write_record(&[
                        payload.server_ts_ms.to_string(),
                        p.athlete_id.clone(),
                        p.lat.to_string(),
                        p.lon.to_string(),
                        p.sog_knots.map(|v| v.to_string()).unwrap_or_default(),
                        p.cog_deg.map(|v| v.to_string()).unwrap_or_default(),
                        String::new(),
                        String::new(),
                        String::new(),
                    ]);
                }
            }
        }
        MessageType::GateMetrics => {
            if let Ok(payload) = serde_json::from_value::<GateMetricsPayload>(envelope.payload.clone()) {
                for m in &payload.metrics {
                    let status = serde_json::to_value(m.status)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    let _ = writer.write_record(&[
                        payload.server_ts_ms.to_string(),
                        m.athlete_id.clone(),
                        String::new(),
                        String::new(),
                        String::new(),
                        String::new(),
                        status,
                        m.d_perp_signed_m.to_string(),
                        m.eta_s.map(|v| v.to_string()).unwrap_or_default(),
                    ]);
                }
            }
        }
        _ => {}
    }

    let bytes = writer.into_inner().unwrap_or_default();
    let text = String::from_utf8(bytes).unwrap_or_default();
    text.lines().map(|l| format!("{l}\n")).collect()
}
