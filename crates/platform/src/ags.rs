//! Assignment & Grade Services endpoints: line items, scores, results.
//!
//! Line item `id` fields are emitted as absolute URLs per the AGS
//! specification, never as bare integers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lectern_core::http::{base_url, encode_path_segment};
use lectern_core::models::ags::{LineItem, Score};

use crate::claims::{SCOPE_LINEITEM, SCOPE_LINEITEM_READONLY, SCOPE_RESULT_READONLY, SCOPE_SCORE};
use crate::error::ApiError;
use crate::guard::{authorize_bearer, ScopeMode};
use crate::routes::AppState;

const REALM: &str = "lti-ags";

/// The public line item shape per AGS (camelCase, URL id).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiLineItem {
    id: String,
    label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    resource_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    resource_link_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    tag: String,
    score_maximum: f64,
    #[serde(rename = "startDateTime", skip_serializing_if = "Option::is_none")]
    start_at: Option<DateTime<Utc>>,
    #[serde(rename = "endDateTime", skip_serializing_if = "Option::is_none")]
    end_at: Option<DateTime<Utc>>,
}

/// Derive the absolute base for resource URLs in responses.
pub(crate) fn request_base(state: &AppState, headers: &HeaderMap) -> String {
    base_url(
        state.config.public_base_url.as_deref(),
        headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()),
        headers.get("x-forwarded-host").and_then(|v| v.to_str().ok()),
        headers.get(header::HOST).and_then(|v| v.to_str().ok()),
    )
}

fn item_url(base: &str, context_id: &str, id: i64) -> String {
    format!(
        "{base}/api/ags/contexts/{}/lineitems/{id}",
        encode_path_segment(context_id)
    )
}

fn to_api(base: &str, item: &LineItem) -> ApiLineItem {
    ApiLineItem {
        id: item_url(base, &item.context_id, item.id),
        label: item.label.clone(),
        resource_id: item.resource_id.clone(),
        resource_link_id: item.resource_link_id.clone(),
        tag: item.tag.clone(),
        score_maximum: item.score_maximum,
        start_at: item.start_at,
        end_at: item.end_at,
    }
}

fn parse_line_item_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("invalidLineItemId"))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    resource_link_id: String,
}

/// GET /api/ags/contexts/{contextId}/lineitems
pub async fn list_line_items(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(context_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AnyOf,
        &[SCOPE_LINEITEM_READONLY, SCOPE_LINEITEM],
    )?;

    let mut items = state.scores.list_line_items(&context_id).await?;
    if !params.resource_link_id.is_empty() {
        items.retain(|item| item.resource_link_id == params.resource_link_id);
    }

    let base = request_base(&state, &headers);
    let response: Vec<ApiLineItem> = items.iter().map(|item| to_api(&base, item)).collect();
    debug!(context_id = %context_id, count = response.len(), "ags: listed line items");
    Ok(Json(response).into_response())
}

/// POST /api/ags/contexts/{contextId}/lineitems
pub async fn create_line_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(context_id): Path<String>,
    body: String,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AnyOf,
        &[SCOPE_LINEITEM],
    )?;

    let mut item: LineItem =
        serde_json::from_str(&body).map_err(|_| ApiError::bad_request("invalidJson"))?;
    item.context_id = context_id.clone();
    if item.score_maximum <= 0.0 {
        return Err(ApiError::bad_request("scoreMaximumIsRequired"));
    }

    let id = state.scores.create_line_item(&item).await?;
    item.id = id;
    debug!(context_id = %context_id, id, "ags: created line item");

    let base = request_base(&state, &headers);
    let location = item_url(&base, &context_id, id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(to_api(&base, &item)),
    )
        .into_response())
}

/// GET /api/ags/contexts/{contextId}/lineitems/{lineItemId}
pub async fn get_line_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((context_id, line_item_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AnyOf,
        &[SCOPE_LINEITEM_READONLY, SCOPE_LINEITEM],
    )?;

    let id = parse_line_item_id(&line_item_id)?;
    let item = state
        .scores
        .get_line_item(id, &context_id)
        .await?
        .ok_or_else(|| ApiError::not_found("line item not found"))?;

    let base = request_base(&state, &headers);
    Ok(Json(to_api(&base, &item)).into_response())
}

/// PUT /api/ags/contexts/{contextId}/lineitems/{lineItemId}
pub async fn update_line_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((context_id, line_item_id)): Path<(String, String)>,
    body: String,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AnyOf,
        &[SCOPE_LINEITEM],
    )?;

    let id = parse_line_item_id(&line_item_id)?;
    let mut item: LineItem =
        serde_json::from_str(&body).map_err(|_| ApiError::bad_request("invalidJson"))?;
    item.id = id;
    item.context_id = context_id.clone();

    if !state.scores.update_line_item(&item).await? {
        return Err(ApiError::not_found("line item not found"));
    }
    debug!(context_id = %context_id, id, "ags: updated line item");

    let base = request_base(&state, &headers);
    Ok(Json(to_api(&base, &item)).into_response())
}

/// DELETE /api/ags/contexts/{contextId}/lineitems/{lineItemId}
pub async fn delete_line_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((context_id, line_item_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AnyOf,
        &[SCOPE_LINEITEM],
    )?;

    let id = parse_line_item_id(&line_item_id)?;
    if !state.scores.delete_line_item(id, &context_id).await? {
        return Err(ApiError::not_found("line item not found"));
    }
    debug!(context_id = %context_id, id, "ags: deleted line item");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /api/ags/contexts/{contextId}/lineitems/{lineItemId}/scores
pub async fn post_score(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((context_id, line_item_id)): Path<(String, String)>,
    body: String,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AnyOf,
        &[SCOPE_SCORE],
    )?;

    let id = parse_line_item_id(&line_item_id)?;
    let score: Score =
        serde_json::from_str(&body).map_err(|_| ApiError::bad_request("invalidJson"))?;

    state
        .scores
        .upsert_result_from_score(id, &context_id, &score)
        .await?;
    debug!(
        context_id = %context_id,
        line_item_id = id,
        user_id = %score.user_id,
        "ags: recorded score"
    );
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /api/ags/contexts/{contextId}/lineitems/{lineItemId}/results
pub async fn list_results(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((context_id, line_item_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AnyOf,
        &[SCOPE_RESULT_READONLY],
    )?;

    let id = parse_line_item_id(&line_item_id)?;
    let results = state.scores.list_results_by_line_item(id, &context_id).await?;
    Ok(Json(results).into_response())
}
