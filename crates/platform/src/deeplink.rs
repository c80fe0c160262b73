//! Deep Linking return endpoint: verifies the tool's response JWT, persists
//! the selected content items, and materializes AGS line items for items
//! that carry a gradable `lineItem`.

use std::sync::Arc;

use askama::Template;
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use lectern_core::models::ags::LineItem;
use lectern_core::models::deeplink::DeepLinkSelection;

use crate::claims::{CLAIM_DL_CONTENT_ITEMS, CLAIM_DL_DATA};
use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DeepLinkParams {
    /// Per 1EdTech Deep Linking, the tool posts the response as `JWT`.
    #[serde(default, rename = "JWT")]
    jwt: String,
    /// Vendor-quirk fallback.
    #[serde(default)]
    id_token: String,
}

#[derive(Template)]
#[template(path = "deeplink_result.html")]
struct DeepLinkResultTemplate<'a> {
    matched_tool: &'a str,
    claims_json: &'a str,
}

/// GET/POST /api/deeplink/return
pub async fn deeplink_return(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeepLinkParams>,
    form: Option<Form<DeepLinkParams>>,
) -> Result<Response, ApiError> {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    let response_jwt = [form.jwt, form.id_token, query.jwt, query.id_token]
        .into_iter()
        .find(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request("missing deep linking JWT (expected form field 'JWT')")
        })?;

    // Try to verify against each registered tool's JWKS; the first success
    // identifies the tool. Verification failure does not abort: the PoC
    // still renders and persists the claims.
    let mut matched_tool = String::new();
    let tools = state.tools.list_tools().await.unwrap_or_default();
    for tool in &tools {
        if tool.key_set_url.is_empty() {
            continue;
        }
        let set = match state.jwks_cache.get(&tool.key_set_url).await {
            Ok(set) => set,
            Err(_) => continue,
        };
        if verify_with_set(&response_jwt, &set) {
            matched_tool = tool.name.clone();
            break;
        }
    }
    if matched_tool.is_empty() {
        debug!("deeplink_return: no registered tool verified the response JWT");
    }

    let payload = decode_payload(&response_jwt).unwrap_or_else(|| serde_json::json!({}));

    let client_id = effective_client_id(&payload);
    let context_id = payload
        .get(CLAIM_DL_DATA)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    if let Some(items) = payload.get(CLAIM_DL_CONTENT_ITEMS).and_then(|v| v.as_array()) {
        debug!(count = items.len(), client_id = %client_id, "deeplink_return: content items");
        for item in items {
            let Some(object) = item.as_object() else { continue };
            let url = object.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let full_json =
                serde_json::to_string(object).unwrap_or_else(|_| "{}".to_string());

            let selection_id = match state
                .tools
                .create_deep_link_selection(&DeepLinkSelection {
                    id: 0,
                    client_id: client_id.clone(),
                    tool_name: matched_tool.clone(),
                    url: url.to_string(),
                    content_item_json: full_json,
                    created_at: chrono::Utc::now(),
                })
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    debug!(error = %e, "deeplink_return: failed to persist selection");
                    continue;
                }
            };

            materialize_line_item(&state, object, selection_id, &context_id).await;
        }
    }

    let pretty = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string());
    let page = DeepLinkResultTemplate {
        matched_tool: &matched_tool,
        claims_json: &pretty,
    }
    .render()
    .map_err(|e| ApiError::internal(format!("template error: {e}")))?;
    Ok(Html(page).into_response())
}

/// Create a line item bound to the new selection when the content item
/// carries a gradable `lineItem`. Mapping failures are logged, never fatal.
async fn materialize_line_item(
    state: &AppState,
    item: &serde_json::Map<String, serde_json::Value>,
    selection_id: i64,
    context_id: &str,
) {
    let Some(line_item) = item.get("lineItem").and_then(|v| v.as_object()) else {
        return;
    };
    let label = line_item.get("label").and_then(|v| v.as_str()).unwrap_or("");
    let score_maximum = line_item
        .get("scoreMaximum")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    if label.is_empty() || score_maximum <= 0.0 || selection_id == 0 || context_id.is_empty() {
        debug!("deeplink_return: lineItem missing label/scoreMaximum/context; skipping create");
        return;
    }

    let resource_link_id = selection_id.to_string();
    let new_item = LineItem {
        context_id: context_id.to_string(),
        label: label.to_string(),
        resource_link_id: resource_link_id.clone(),
        score_maximum,
        ..Default::default()
    };
    match state.scores.create_line_item(&new_item).await {
        Ok(new_id) => {
            if let Err(e) = state
                .scores
                .create_line_item_mapping(new_id, &resource_link_id)
                .await
            {
                debug!(error = %e, "deeplink_return: create mapping error");
            } else {
                debug!(
                    line_item_id = new_id,
                    resource_link_id = %resource_link_id,
                    "deeplink_return: created line item and mapping"
                );
            }
        }
        Err(e) => debug!(error = %e, "deeplink_return: create line item error"),
    }
}

fn verify_with_set(token: &str, set: &JwkSet) -> bool {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;
    for jwk in &set.keys {
        if let AlgorithmParameters::RSA(rsa) = &jwk.algorithm {
            if let Ok(key) = DecodingKey::from_rsa_components(&rsa.n, &rsa.e) {
                if decode::<serde_json::Value>(token, &key, &validation).is_ok() {
                    return true;
                }
            }
        }
    }
    false
}

/// Decode the JWT payload segment without verification.
fn decode_payload(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `aud` may be a string or an array; the first element wins.
fn effective_client_id(payload: &serde_json::Value) -> String {
    match payload.get("aud") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .first()
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        _ => String::new(),
    }
}
