use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;

use super::page::{self, Notice};
use super::AppState;
use crate::errors::AppError;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct KeyForm {
    pub key: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /: landing page with the add/remove forms
pub async fn landing() -> Html<String> {
    Html(page::render(None))
}

/// POST /add_key: store a new token
pub async fn add_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<KeyForm>,
) -> Response {
    let outcome = match form.key.as_deref() {
        Some(raw) => state.store.add(raw).await.map(|_| ()),
        None => Err(AppError::MissingToken),
    };
    respond(&headers, outcome, StatusCode::CREATED, "token added")
}

/// POST /remove_key: delete a stored token
pub async fn remove_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<KeyForm>,
) -> Response {
    let outcome = match form.key.as_deref() {
        Some(raw) => state.store.remove(raw).await,
        None => Err(AppError::MissingToken),
    };
    respond(&headers, outcome, StatusCode::OK, "token removed")
}

/// Browsers get the page back with an inline notice; everything else gets JSON.
/// The status code is the same either way.
fn respond(
    headers: &HeaderMap,
    outcome: Result<(), AppError>,
    success: StatusCode,
    message: &'static str,
) -> Response {
    let html = wants_html(headers);
    match outcome {
        Ok(()) if html => (success, Html(page::render(Some(Notice::success(message))))).into_response(),
        Ok(()) => (success, Json(json!({ "message": message }))).into_response(),
        Err(e) if html => {
            let (_, _, msg) = e.describe();
            (e.status(), Html(page::render(Some(Notice::error(&msg))))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false)
}
