//! Admin endpoints for persisted deep-link selections.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use crate::error::ApiError;
use crate::routes::AppState;

/// GET /api/deeplink/selections
pub async fn list_selections(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let selections = state.tools.list_deep_link_selections().await?;
    Ok(Json(selections).into_response())
}

/// GET /api/deeplink/selections/{id}
pub async fn get_selection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::bad_request("invalid id"))?;
    let selection = state
        .tools
        .get_deep_link_selection(id)
        .await?
        .ok_or_else(|| ApiError::not_found("selection not found"))?;
    Ok(Json(selection).into_response())
}

/// DELETE /api/deeplink/selections/{id}
pub async fn delete_selection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::bad_request("invalid id"))?;
    if !state.tools.delete_deep_link_selection(id).await? {
        return Err(ApiError::not_found("selection not found"));
    }
    debug!(id, "deleted deep link selection");
    Ok(StatusCode::NO_CONTENT.into_response())
}
