use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use super::AppState;
use crate::editor::EditorFile;
use crate::sandbox::SandboxError;

/// GET /api/session
pub(crate) async fn session_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.status())
}

/// GET /api/logs
pub(crate) async fn list_logs(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state.orchestrator.log().entries();
    Json(json!({ "count": entries.len(), "entries": entries }))
}

/// GET /api/logs/stream: entries appended from now on, as `log` events.
pub(crate) async fn stream_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut entries = BroadcastStream::new(state.orchestrator.log().subscribe());
    let stream = async_stream::stream! {
        while let Some(entry) = entries.next().await {
            match entry {
                Ok(entry) => match Event::default().event("log").json_data(&entry) {
                    Ok(event) => {
                        yield Ok(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to encode log entry"),
                },
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /api/session/stream: the current status, then every change.
pub(crate) async fn stream_status(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.orchestrator.subscribe()).filter_map(|status| {
        Event::default()
            .event("status")
            .json_data(&status)
            .ok()
            .map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// DELETE /api/logs
pub(crate) async fn clear_logs(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.log().clear();
    tracing::info!("session log cleared");
    StatusCode::NO_CONTENT
}

/// GET /api/files/{*path}: open a file in the editor.
pub(crate) async fn read_file(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let runtime = match state.orchestrator.manager().try_get() {
        Ok(runtime) => runtime,
        Err(e) => return sandbox_error(e),
    };
    match runtime.read_to_string(&path).await {
        Ok(content) => {
            state.editor.select(path.as_str()).await;
            Json(EditorFile::new(&path, content)).into_response()
        }
        Err(e) => sandbox_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEdit {
    content: String,
}

/// PUT /api/files/{*path}: an editor change, debounced before it is saved.
pub(crate) async fn update_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<FileEdit>,
) -> StatusCode {
    state.editor.edit(path, body.content).await;
    StatusCode::ACCEPTED
}

/// GET /api/modified
pub(crate) async fn modified_files(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "files": state.files.modified() }))
}

fn sandbox_error(err: SandboxError) -> Response {
    let status = match &err {
        SandboxError::NotReady | SandboxError::BootFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        SandboxError::NotFound(_) => StatusCode::NOT_FOUND,
        SandboxError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        SandboxError::InvalidUtf8 { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => {
            tracing::error!(error = %err, "sandbox request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
