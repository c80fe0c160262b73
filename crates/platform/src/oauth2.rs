//! Token endpoint: the private_key_jwt client-credentials grant.
//!
//! Tools authenticate by signing a JWT with their own key; the platform
//! verifies it against the tool's published JWKS, burns the assertion's
//! `jti`, and issues a short-lived scoped access token.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Form, Json};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lectern_core::models::tool::Tool;

use crate::claims::{
    random_subject, AccessTokenClaims, ClientAssertionClaims, CLIENT_ASSERTION_TYPE_JWT_BEARER,
};
use crate::error::ApiError;
use crate::routes::AppState;

/// Deliberately short so tools exercise the token endpoint frequently
/// during development; production deployments raise this to an hour.
const ACCESS_TOKEN_TTL_SECS: i64 = 60;

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    grant_type: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_assertion_type: String,
    #[serde(default)]
    client_assertion: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

/// POST /api/oauth2/token
pub async fn token(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if form.grant_type != "client_credentials" {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "grant_type must be client_credentials",
        ));
    }
    if form.scope.is_empty() {
        return Err(ApiError::bad_request("missing scope"));
    }
    if form.client_assertion_type != CLIENT_ASSERTION_TYPE_JWT_BEARER {
        return Err(ApiError::bad_request("invalid client_assertion_type"));
    }
    if form.client_assertion.is_empty() {
        return Err(ApiError::bad_request("missing client_assertion"));
    }

    // Some tools omit client_id with private_key_jwt; peek the assertion
    // payload for a candidate.
    let mut client_id = form.client_id.clone();
    if client_id.is_empty() {
        if let Some(payload) = peek_payload(&form.client_assertion) {
            if let Some(iss) = payload.get("iss").and_then(|v| v.as_str()) {
                debug!(iss, "token: inferring client_id from assertion iss");
                client_id = iss.to_string();
            } else if let Some(sub) = payload.get("sub").and_then(|v| v.as_str()) {
                debug!(sub, "token: inferring client_id from assertion sub");
                client_id = sub.to_string();
            }
        }
    }

    let token_endpoint = format!("{}/api/oauth2/token", state.config.issuer);

    let mut resolved: Option<(Tool, ClientAssertionClaims)> = None;
    let mut jwks_unreachable = false;

    // Primary path: a known client_id names the tool directly.
    if !client_id.is_empty() {
        let tool = state
            .tools
            .get_tool_by_client_id(&client_id)
            .await
            .map_err(|e| ApiError::internal(format!("repository error: {e}")))?;
        if let Some(tool) = tool {
            if !tool.key_set_url.is_empty() {
                match state.jwks_cache.get(&tool.key_set_url).await {
                    Ok(set) => {
                        if let Some(claims) =
                            validate_assertion(&form.client_assertion, &set, &token_endpoint)
                        {
                            resolved = Some((tool, claims));
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "token: JWKS fetch failed for known client");
                        jwks_unreachable = true;
                    }
                }
            }
        }
    }

    // Fallback discovery: iterate registered tools and try each JWKS.
    if resolved.is_none() {
        let all = state
            .tools
            .list_tools()
            .await
            .map_err(|e| ApiError::internal(format!("repository error: {e}")))?;
        for tool in all {
            if tool.key_set_url.is_empty() {
                continue;
            }
            let set = match state.jwks_cache.get(&tool.key_set_url).await {
                Ok(set) => set,
                Err(_) => continue,
            };
            if let Some(claims) = validate_assertion(&form.client_assertion, &set, &token_endpoint)
            {
                debug!(tool = %tool.name, "token: resolved client_assertion via JWKS");
                resolved = Some((tool, claims));
                break;
            }
        }
    }

    let Some((tool, assertion)) = resolved else {
        if jwks_unreachable {
            return Err(ApiError::new(
                StatusCode::BAD_GATEWAY,
                "invalid_client",
                "failed to fetch client JWKS",
            ));
        }
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "unable to validate client_assertion against any registered tool",
        ));
    };

    // Either iss or sub may carry the client_id; tools disagree on which.
    let iss = assertion.iss.as_deref().unwrap_or("");
    let sub = assertion.sub.as_deref().unwrap_or("");
    if !tool.client_id.is_empty() {
        if iss != tool.client_id && sub != tool.client_id {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "client_assertion iss/sub do not match registered client_id",
            ));
        }
    } else if iss.is_empty() && sub.is_empty() {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client_assertion missing iss/sub",
        ));
    }
    let effective_client_id = if !tool.client_id.is_empty() {
        tool.client_id.clone()
    } else if !sub.is_empty() {
        sub.to_string()
    } else {
        iss.to_string()
    };

    // Replay defense: each assertion jti is usable once until it expires.
    let jti = assertion.jti.as_deref().unwrap_or("");
    if jti.is_empty() {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client_assertion missing jti",
        ));
    }
    let assertion_exp: DateTime<Utc> = DateTime::from_timestamp(assertion.exp, 0)
        .ok_or_else(|| ApiError::bad_request("invalid exp in client_assertion"))?;
    let fresh = state
        .validation
        .try_use_client_assertion_jti(jti, &effective_client_id, assertion_exp)
        .await
        .map_err(|e| ApiError::internal(format!("validation store error: {e}")))?;
    if !fresh {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client_assertion replay detected",
        ));
    }

    let now = Utc::now();
    let expires_at = now + Duration::seconds(ACCESS_TOKEN_TTL_SECS);
    let access_claims = AccessTokenClaims {
        iss: state.config.issuer.clone(),
        sub: effective_client_id.clone(),
        aud: serde_json::json!([format!("{}/api", state.config.issuer)]),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
        jti: random_subject(),
        scope: serde_json::json!(form.scope),
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(state.keys.kid().to_string());
    let access_token = encode(&header, &access_claims, state.keys.encoding_key())
        .map_err(|e| ApiError::internal(format!("failed to sign access token: {e}")))?;

    debug!(client_id = %effective_client_id, scope = %form.scope, "token: issued access token");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer".into(),
        expires_in: ACCESS_TOKEN_TTL_SECS,
        scope: form.scope,
    }))
}

/// Try to validate the assertion against every RSA key in the set, the
/// header's `kid` match first.
fn validate_assertion(
    assertion: &str,
    set: &JwkSet,
    token_endpoint: &str,
) -> Option<ClientAssertionClaims> {
    let header = decode_header(assertion).ok()?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[token_endpoint]);
    validation.set_required_spec_claims(&["exp", "aud"]);

    let mut candidates: Vec<(bool, DecodingKey)> = Vec::new();
    for jwk in &set.keys {
        if let AlgorithmParameters::RSA(rsa) = &jwk.algorithm {
            if let Ok(key) = DecodingKey::from_rsa_components(&rsa.n, &rsa.e) {
                let kid_match = jwk.common.key_id.as_deref() == header.kid.as_deref()
                    && header.kid.is_some();
                candidates.push((kid_match, key));
            }
        }
    }
    candidates.sort_by_key(|(kid_match, _)| !*kid_match);

    for (_, key) in &candidates {
        if let Ok(data) = decode::<ClientAssertionClaims>(assertion, key, &validation) {
            return Some(data.claims);
        }
    }
    None
}

/// Decode the assertion payload without verification; used only to infer a
/// candidate client_id before the real validation runs.
fn peek_payload(assertion: &str) -> Option<serde_json::Value> {
    let payload = assertion.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}
