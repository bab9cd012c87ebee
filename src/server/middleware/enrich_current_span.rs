use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::Span;

/// Record request coordinates on the span opened by the sentry tower layer.
pub async fn enrich_current_span(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri();
    let host = req
        .headers()
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("UNKNOWN");

    let span = Span::current();
    span.record("http.uri", uri.path());
    span.record("http.host", host);
    if let Some(query) = uri.query() {
        span.record("http.query", query);
    }
    tracing::trace!(method = %req.method(), path = %uri.path(), "request");

    next.run(req).await
}
