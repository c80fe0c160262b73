//! Names & Role Provisioning Services: paginated membership listing plus
//! sandbox roster management helpers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use lectern_core::models::roster::Member;

use crate::ags::request_base;
use crate::claims::SCOPE_MEMBERSHIP_READONLY;
use crate::error::ApiError;
use crate::guard::{authorize_bearer, ScopeMode};
use crate::routes::AppState;

const REALM: &str = "NRPS";
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    offset: Option<String>,
}

/// Invalid numeric inputs fall back to the defaults.
fn parse_paging(query: Option<&str>) -> (i64, i64) {
    let params: PageParams = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();
    let limit = params
        .limit
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_LIMIT);
    let offset = params
        .offset
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v >= 0)
        .unwrap_or(0);
    (offset, limit)
}

/// Echo the current request URL with updated paging parameters.
fn page_url(base: &str, path: &str, query: Option<&str>, offset: i64, limit: i64) -> String {
    let mut pairs: Vec<(String, String)> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    pairs.retain(|(key, _)| key != "offset" && key != "limit");
    pairs.push(("offset".into(), offset.to_string()));
    pairs.push(("limit".into(), limit.to_string()));
    let query_string = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{base}{path}?{query_string}")
}

/// GET /api/nrps/contexts/{contextId}/members
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(context_id): Path<String>,
    uri: Uri,
) -> Result<Response, ApiError> {
    authorize_bearer(
        &headers,
        &state.keys,
        &state.config.issuer,
        REALM,
        ScopeMode::AllOf,
        &[SCOPE_MEMBERSHIP_READONLY],
    )?;

    let (offset, limit) = parse_paging(uri.query());
    let (members, total) = state
        .roster
        .list_members_page(&context_id, offset, limit)
        .await?;
    debug!(context_id = %context_id, offset, limit, total, "nrps: listed members");

    let base = request_base(&state, &headers);
    let container = format!("{base}{}", uri.path());

    let body = json!({
        "id": container,
        "context": {"id": context_id},
        "members": members,
    });

    let mut response = Json(body).into_response();
    if offset + limit < total {
        let next = page_url(&base, uri.path(), uri.query(), offset + limit, limit);
        if let Ok(value) = format!("<{next}>; rel=\"next\"").parse() {
            response.headers_mut().insert("link", value);
        }
    }
    Ok(response)
}

/// POST /api/nrps/contexts/{contextId}/members — sandbox roster helper,
/// not part of the NRPS specification.
pub async fn upsert_member(
    State(state): State<Arc<AppState>>,
    Path(context_id): Path<String>,
    body: String,
) -> Result<Response, ApiError> {
    let member: Member =
        serde_json::from_str(&body).map_err(|_| ApiError::bad_request("invalidJson"))?;
    if member.user_id.is_empty() {
        return Err(ApiError::bad_request("userIdRequired"));
    }
    state.roster.upsert_member(&context_id, &member).await?;
    Ok(Json(member).into_response())
}

/// DELETE /api/nrps/contexts/{contextId}/members/{userId} — sandbox helper.
pub async fn delete_member(
    State(state): State<Arc<AppState>>,
    Path((context_id, user_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    if !state.roster.delete_member(&context_id, &user_id).await? {
        return Err(ApiError::not_found("member not found"));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}
