//! HTTP status surface over one session.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hyper::StatusCode;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::editor::{EditDebouncer, FileStateOwner};
use crate::orchestrator::Orchestrator;
use self::middleware::enrich_current_span::enrich_current_span;
use self::middleware::strip_trailing_slash::strip_trailing_slash;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub editor: EditDebouncer,
    pub files: Arc<FileStateOwner>,
}

async fn not_found(req: Request<Body>) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}

pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/session", get(routes::session_status))
        .route("/session/stream", get(routes::stream_status))
        .route("/logs", get(routes::list_logs).delete(routes::clear_logs))
        .route("/logs/stream", get(routes::stream_logs))
        .route("/files/{*path}", get(routes::read_file).put(routes::update_file))
        .route("/modified", get(routes::modified_files));

    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .nest("/api", api)
        .fallback(not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(strip_trailing_slash))
        .layer(axum::middleware::from_fn(enrich_current_span))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cross-origin-embedder-policy"),
            HeaderValue::from_static("require-corp"),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor;
    use crate::log::SessionLog;
    use crate::orchestrator::PipelineOptions;
    use crate::sandbox::backends::memory::MemoryRuntime;
    use crate::sandbox::{FileContents, FileTree, RuntimeManager, SandboxRuntime};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_app() -> (Router, Arc<MemoryRuntime>, SessionLog) {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime
            .mount(&FileTree::from_records(vec![(
                "src/App.tsx".to_string(),
                FileContents::Text("export default 1".to_string()),
            )]))
            .await
            .unwrap();
        let manager = Arc::new(RuntimeManager::ready(runtime.clone()));
        let log = SessionLog::new();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&manager),
            None,
            log.clone(),
            PipelineOptions::default(),
        ));
        let (editor, files) = editor::start(manager, log.clone(), Duration::from_millis(500));
        let app = create_app(AppState {
            orchestrator,
            editor,
            files,
        });
        (app, runtime, log)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_sets_isolation_headers() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["cross-origin-opener-policy"], "same-origin");
        assert_eq!(resp.headers()["cross-origin-embedder-policy"], "require-corp");
    }

    #[tokio::test]
    async fn test_session_status_starts_initializing() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/session")).await.unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["state"], "initializing");
    }

    #[tokio::test]
    async fn test_logs_list_and_clear() {
        let (app, _, log) = test_app().await;
        log.info("hello");
        let resp = app.clone().oneshot(get("/api/logs")).await.unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["entries"][0]["message"], "hello");
        assert_eq!(json["entries"][0]["severity"], "info");

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/logs")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_read_file_returns_editor_file() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/files/src/App.tsx")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["name"], "App.tsx");
        assert_eq!(json["language"], "typescript");
        assert_eq!(json["content"], "export default 1");
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/files/nope.ts")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_is_debounced_into_sandbox_and_modified_map() {
        let (app, runtime, _) = test_app().await;
        let req = Request::builder()
            .method("PUT")
            .uri("/api/files/src/App.tsx")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"content":"export default 2"}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            runtime.read_to_string("src/App.tsx").await.unwrap(),
            "export default 2"
        );
        let json = body_json(app.oneshot(get("/api/modified")).await.unwrap()).await;
        assert_eq!(json["files"]["src/App.tsx"], "export default 2");
    }

    #[tokio::test]
    async fn test_status_stream_is_event_stream() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/session/stream")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        let mut body = resp.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("event: status\n"));
        assert!(text.contains("\"state\":\"initializing\""));
    }

    #[tokio::test]
    async fn test_trailing_slash_redirects() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/session/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(resp.headers()["location"], "/api/session");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
