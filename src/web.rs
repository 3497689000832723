//! JSON control API consumed by the external control panel.
//!
//! Lifecycle commands and status only; the panel's UI lives elsewhere.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::logging::{LogFilter, RecentLogBuffer};
use crate::supervisor::{StartOutcome, Status, StopOutcome, Supervisor};
use crate::tasks::slideshow::SlideshowCommand;

#[derive(Clone)]
struct AppState {
    supervisor: Arc<Supervisor>,
    logs: RecentLogBuffer,
}

pub fn spawn(
    supervisor: Arc<Supervisor>,
    logs: RecentLogBuffer,
    cancel: CancellationToken,
    bind_addr: SocketAddr,
) -> JoinHandle<()> {
    let state = AppState { supervisor, logs };
    let app = Router::new()
        .route("/api/status", get(status))
        .route("/api/uploader/start", post(start_uploader))
        .route("/api/uploader/stop", post(stop_uploader))
        .route("/api/slideshow/start", post(start_slideshow))
        .route("/api/slideshow/stop", post(stop_slideshow))
        .route("/api/slideshow/next", post(slideshow_next))
        .route("/api/slideshow/previous", post(slideshow_previous))
        .route("/api/slideshow/pause", post(slideshow_pause))
        .route("/api/slideshow/reshuffle", post(slideshow_reshuffle))
        .route("/api/logs", get(recent_logs))
        .with_state(state);

    tokio::spawn(async move {
        tracing::info!(%bind_addr, "starting control API server");
        match TcpListener::bind(bind_addr).await {
            Ok(listener) => {
                let shutdown = cancel.clone();
                if let Err(err) = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        shutdown.cancelled().await;
                    })
                    .await
                {
                    tracing::error!(error = %err, "control API server failed");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, %bind_addr, "control API could not bind");
            }
        }
    })
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(state.supervisor.status())
}

fn start_response(outcome: StartOutcome) -> Json<Value> {
    let state = match outcome {
        StartOutcome::Started => "started",
        StartOutcome::AlreadyRunning => "already-running",
    };
    Json(json!({ "state": state }))
}

fn stop_response(outcome: StopOutcome) -> Json<Value> {
    let state = match outcome {
        StopOutcome::Stopped => "stopped",
        StopOutcome::NotRunning => "not-running",
    };
    Json(json!({ "state": state }))
}

async fn start_uploader(State(state): State<AppState>) -> Json<Value> {
    start_response(state.supervisor.start_uploader())
}

async fn stop_uploader(State(state): State<AppState>) -> Json<Value> {
    stop_response(state.supervisor.stop_uploader())
}

async fn start_slideshow(State(state): State<AppState>) -> Json<Value> {
    start_response(state.supervisor.start_slideshow())
}

async fn stop_slideshow(State(state): State<AppState>) -> Json<Value> {
    stop_response(state.supervisor.stop_slideshow())
}

async fn forward_command(
    state: AppState,
    command: SlideshowCommand,
) -> (StatusCode, Json<Value>) {
    if state.supervisor.slideshow_command(command).await {
        (StatusCode::OK, Json(json!({ "state": "ok" })))
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "slideshow not running" })),
        )
    }
}

async fn slideshow_next(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    forward_command(state, SlideshowCommand::Next).await
}

async fn slideshow_previous(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    forward_command(state, SlideshowCommand::Previous).await
}

async fn slideshow_pause(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    forward_command(state, SlideshowCommand::TogglePause).await
}

async fn slideshow_reshuffle(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    forward_command(state, SlideshowCommand::Reshuffle).await
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    filter: Option<String>,
}

async fn recent_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    let filter = LogFilter::parse(query.filter.as_deref());
    Json(json!({ "lines": state.logs.recent_lines(filter) }))
}
