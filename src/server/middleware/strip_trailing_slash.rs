use axum::{
    body::Body,
    http::{Request, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

/// Permanently redirect `/path/` to `/path`, keeping the query.
pub async fn strip_trailing_slash(req: Request<Body>, next: Next) -> Response {
    match redirect_target(req.uri()) {
        Some(target) => Redirect::permanent(&target).into_response(),
        None => next.run(req).await,
    }
}

fn redirect_target(uri: &Uri) -> Option<String> {
    let path = uri.path().strip_suffix('/').filter(|p| !p.is_empty())?;
    Some(match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    })
}
