//! Launch initiator: starts the LTI 1.3 third-party initiated login by
//! redirecting the user-agent to the tool's login initiation URL.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use lectern_core::models::oidc::OidcState;

use crate::error::ApiError;
use crate::routes::AppState;

/// Launch states expire 15 minutes after creation.
const STATE_TTL_MINUTES: i64 = 15;

/// The correlation cookie only needs to survive the round trip through the
/// tool's login initiation redirect.
const CORR_COOKIE_MAX_AGE_SECS: i64 = 120;

pub(crate) const CORR_COOKIE: &str = "lti_corr";

#[derive(Debug, Default, Deserialize)]
struct LaunchRequest {
    #[serde(default)]
    issuer: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    login_initiation_url: String,
    #[serde(default)]
    target_link_uri: String,
    #[serde(default)]
    context_id: String,
    #[serde(default)]
    login_hint: String,
    #[serde(default)]
    lti_message_hint: String,
    #[serde(default)]
    resource_link_id: String,
}

/// POST /api/launch/start — accepts JSON or a browser form post.
pub async fn launch_start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let req: LaunchRequest = if content_type.starts_with("application/json") {
        serde_json::from_str(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?
    } else {
        serde_urlencoded::from_str(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid form body: {e}")))?
    };

    if req.issuer.is_empty()
        || req.client_id.is_empty()
        || req.login_initiation_url.is_empty()
        || req.target_link_uri.is_empty()
    {
        return Err(ApiError::bad_request(
            "missing required fields: issuer, client_id, login_initiation_url, target_link_uri",
        ));
    }

    let mut redirect = Url::parse(&req.login_initiation_url)
        .map_err(|_| ApiError::bad_request("invalid login_initiation_url"))?;

    let launch_state = Uuid::new_v4().to_string();
    let nonce = Uuid::new_v4().to_string();

    state
        .validation
        .create_oidc_state(&OidcState {
            state: launch_state.clone(),
            client_id: req.client_id.clone(),
            target_link_uri: req.target_link_uri.clone(),
            resource_link_id: req.resource_link_id.clone(),
            context_id: req.context_id.clone(),
            expires_at: Utc::now() + Duration::minutes(STATE_TTL_MINUTES),
        })
        .await
        .map_err(|e| ApiError::internal(format!("failed to create state: {e}")))?;

    {
        let mut query = redirect.query_pairs_mut();
        query.append_pair("iss", &req.issuer);
        query.append_pair("client_id", &req.client_id);
        if !req.lti_message_hint.is_empty() {
            query.append_pair("lti_message_hint", &req.lti_message_hint);
        }
        query.append_pair("target_link_uri", &req.target_link_uri);
        if !req.login_hint.is_empty() {
            query.append_pair("login_hint", &req.login_hint);
        }
        if !req.resource_link_id.is_empty() {
            query.append_pair("resource_link_id", &req.resource_link_id);
        }
        query.append_pair("state", &launch_state);
        query.append_pair("nonce", &nonce);
    }

    // First-party correlation cookie; tools are observed to rewrite `state`
    // into their own envelopes, so the cookie is the only trusted handle.
    let cookie = format!(
        "{CORR_COOKIE}={launch_state}; Path=/; Max-Age={CORR_COOKIE_MAX_AGE_SECS}; Secure; HttpOnly; SameSite=Lax"
    );

    debug!(redirect = %redirect, "launch_start: redirecting to tool");
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, redirect.as_str())
        .header(header::SET_COOKIE, cookie)
        .body(Body::empty())
        .map_err(|e| ApiError::internal(e.to_string()))
}
