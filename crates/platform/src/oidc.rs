//! OIDC authorization endpoint: consumes the launch state, builds the LTI
//! id_token, and hands it back to the tool via an auto-submitting form post.
//!
//! Correlation is cookie-only. The `state` the tool echoes is passed back
//! verbatim in the form post but never trusted for correlation — tools are
//! observed to rewrite it into their own envelopes.

use std::sync::Arc;

use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use lectern_core::models::oidc::ConsumedState;
use lectern_core::models::tool::Tool;

use crate::claims::{
    ags_scopes, random_subject, AgsEndpointClaim, DeepLinkingSettings, IdTokenClaims, NrpsClaim,
    ResourceLinkClaim, ServiceClaim, MESSAGE_TYPE_DEEP_LINKING, MESSAGE_TYPE_RESOURCE_LINK,
    ROLE_INSTRUCTOR, ROLE_STUDENT, SCOPE_MEMBERSHIP_READONLY,
};
use crate::error::ApiError;
use crate::launch::CORR_COOKIE;
use crate::routes::AppState;

/// Issued id_tokens are valid for five minutes.
const ID_TOKEN_TTL_MINUTES: i64 = 5;

const DEPLOYMENT_ID: &str = "dev-deployment";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuthParams {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    redirect_uri: String,
    /// Echoed back to the tool verbatim; not trusted for correlation.
    #[serde(default)]
    state: String,
    #[serde(default)]
    nonce: String,
    #[serde(default)]
    lti_message_hint: String,
    #[serde(default)]
    login_hint: String,
}

#[derive(Template)]
#[template(path = "form_post.html")]
struct FormPostTemplate<'a> {
    action: &'a str,
    state: &'a str,
    id_token: &'a str,
}

/// GET/POST /api/oidc/auth
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuthParams>,
    form: Option<Form<AuthParams>>,
) -> Result<Response, ApiError> {
    let params = merge_params(query, form.map(|Form(f)| f));

    if params.client_id.is_empty() || params.redirect_uri.is_empty() {
        return Err(ApiError::bad_request("missing client_id or redirect_uri"));
    }

    // Strict cookie-based correlation.
    let corr = extract_cookie(&headers, CORR_COOKIE)
        .ok_or_else(|| ApiError::unauthorized("missing correlation cookie"))?;
    debug!(corr = %corr, "authorize: consuming correlation state");

    let consumed = state
        .validation
        .consume_oidc_state(&corr)
        .await
        .map_err(|e| ApiError::internal(format!("validation store error: {e}")))?
        .ok_or_else(|| ApiError::unauthorized("invalid or expired correlation state"))?;

    // The cookie is one-shot; every response from here on clears it.
    let mut response = match issue_id_token(&state, &params, &consumed).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    response
        .headers_mut()
        .append(header::SET_COOKIE, HeaderValue::from_static(CLEAR_COOKIE));
    Ok(response)
}

async fn issue_id_token(
    state: &AppState,
    params: &AuthParams,
    consumed: &ConsumedState,
) -> Result<Response, ApiError> {
    if !consumed.client_id.is_empty() && consumed.client_id != params.client_id {
        return Err(ApiError::unauthorized("client_id mismatch"));
    }

    let tool = state
        .tools
        .get_tool_by_client_id(&params.client_id)
        .await
        .map_err(|e| ApiError::internal(format!("repository error: {e}")))?
        .ok_or_else(|| ApiError::bad_request("unknown client_id"))?;

    let is_deep_linking = params.lti_message_hint == "deep_linking";
    validate_redirect(&tool, &params.redirect_uri, is_deep_linking)?;

    let now = Utc::now();
    let (sub, name, email) = subject_from_login_hint(&params.login_hint);
    let roles = launch_roles(&consumed.resource_link_id);

    let mut claims = IdTokenClaims {
        iss: state.config.issuer.clone(),
        sub,
        aud: vec![params.client_id.clone()],
        iat: now.timestamp(),
        exp: (now + Duration::minutes(ID_TOKEN_TTL_MINUTES)).timestamp(),
        nonce: params.nonce.clone(),
        version: "1.3.0".into(),
        message_type: if is_deep_linking {
            MESSAGE_TYPE_DEEP_LINKING.into()
        } else {
            MESSAGE_TYPE_RESOURCE_LINK.into()
        },
        deployment_id: DEPLOYMENT_ID.into(),
        target_link_uri: consumed.target_link_uri.clone(),
        roles,
        resource_link: None,
        ags_endpoint: None,
        nrps: None,
        services: None,
        deep_linking_settings: None,
        name,
        email,
    };

    if is_deep_linking {
        claims.deep_linking_settings = Some(DeepLinkingSettings {
            deep_link_return_url: format!("{}/api/deeplink/return", state.config.issuer),
            data: consumed.context_id.clone(),
            accept_types: vec!["ltiResourceLink".into()],
            accept_presentation_document_targets: vec!["iframe".into(), "window".into()],
            accept_multiple: false,
        });
    } else {
        let context_id = if consumed.context_id.is_empty() {
            debug!("authorize: missing context_id in state; falling back to dev-context");
            "dev-context".to_string()
        } else {
            consumed.context_id.clone()
        };
        let base = state.config.claims_base().to_string();

        // Resolve the mapped line item so the tool can only touch the one
        // column bound to this resource link. Empty segment when unmapped.
        let mut line_item_segment = String::new();
        if !consumed.resource_link_id.is_empty() {
            match state
                .scores
                .get_line_item_id_by_resource_link_id(&consumed.resource_link_id)
                .await
            {
                Ok(Some(id)) => line_item_segment = id.to_string(),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "authorize: line item lookup failed"),
            }
        }

        claims.resource_link = Some(ResourceLinkClaim {
            id: consumed.resource_link_id.clone(),
        });
        claims.ags_endpoint = Some(AgsEndpointClaim {
            lineitem: format!("{base}/api/ags/contexts/{context_id}/lineitems/{line_item_segment}"),
            lineitems: format!("{base}/api/ags/contexts/{context_id}/lineitems"),
            scope: ags_scopes(),
        });
        claims.nrps = Some(NrpsClaim {
            context_memberships_url: format!("{base}/api/nrps/contexts/{context_id}/members"),
            service_versions: vec!["2.0".into()],
        });
        claims.services = Some(vec![
            ServiceClaim {
                endpoint: format!("{base}/api/oauth2/token"),
                scope: ags_scopes(),
            },
            ServiceClaim {
                endpoint: format!("{base}/api/nrps/contexts/{context_id}/members"),
                scope: vec![SCOPE_MEMBERSHIP_READONLY.into()],
            },
        ]);
    }

    let mut jwt_header = Header::new(Algorithm::RS256);
    jwt_header.kid = Some(state.keys.kid().to_string());
    let id_token = encode(&jwt_header, &claims, state.keys.encoding_key())
        .map_err(|e| ApiError::internal(format!("failed to sign id_token: {e}")))?;

    let page = FormPostTemplate {
        action: &params.redirect_uri,
        state: &params.state,
        id_token: &id_token,
    }
    .render()
    .map_err(|e| ApiError::internal(format!("template error: {e}")))?;

    Ok(Html(page).into_response())
}

/// The allowed redirect for this client: the deep-linking return target for
/// deep links, the launch target otherwise, the auth URL as fallback.
fn validate_redirect(tool: &Tool, redirect_uri: &str, is_deep_linking: bool) -> Result<(), ApiError> {
    let mut allowed = if is_deep_linking {
        tool.target_link_url.clone()
    } else {
        tool.target_launch_url.clone()
    };
    if allowed.is_empty() {
        allowed = tool.auth_url.clone();
    }

    let requested =
        Url::parse(redirect_uri).map_err(|_| ApiError::bad_request("invalid redirect_uri"))?;
    let allowed = Url::parse(&allowed)
        .map_err(|_| ApiError::internal("server misconfig: tool redirect url invalid"))?;

    if requested.scheme() != allowed.scheme()
        || requested.host_str() != allowed.host_str()
        || requested.port() != allowed.port()
        || requested.path() != allowed.path()
    {
        debug!(requested = %requested, allowed = %allowed, "authorize: redirect mismatch");
        return Err(ApiError::bad_request("redirect_uri not allowed for this client"));
    }
    Ok(())
}

/// Subject identity is derived from the opaque login hint; anonymous
/// launches get a fresh random subject.
fn subject_from_login_hint(login_hint: &str) -> (String, Option<String>, Option<String>) {
    if login_hint.is_empty() {
        return (random_subject(), None, None);
    }
    let sub = login_hint.to_string();
    if let Some((local, _domain)) = login_hint.split_once('@') {
        let name = if local.is_empty() { None } else { Some(local.to_string()) };
        return (sub, name, Some(login_hint.to_string()));
    }
    (sub, None, None)
}

/// A stored resource_link_id marks a student launch of selected content;
/// instructor otherwise. To be replaced by an authoritative user lookup.
fn launch_roles(resource_link_id: &str) -> Vec<String> {
    if resource_link_id.is_empty() {
        vec![ROLE_INSTRUCTOR.into()]
    } else {
        vec![ROLE_STUDENT.into()]
    }
}

fn merge_params(query: AuthParams, form: Option<AuthParams>) -> AuthParams {
    let form = form.unwrap_or_default();
    AuthParams {
        client_id: first_non_empty(form.client_id, query.client_id),
        redirect_uri: first_non_empty(form.redirect_uri, query.redirect_uri),
        state: first_non_empty(form.state, query.state),
        nonce: first_non_empty(form.nonce, query.nonce),
        lti_message_hint: first_non_empty(form.lti_message_hint, query.lti_message_hint),
        login_hint: first_non_empty(form.login_hint, query.login_hint),
    }
}

fn first_non_empty(a: String, b: String) -> String {
    if !a.is_empty() {
        a
    } else {
        b
    }
}

const CLEAR_COOKIE: &str = "lti_corr=; Path=/; Max-Age=-1; \
    Expires=Thu, 01 Jan 1970 00:00:00 GMT; Secure; HttpOnly; SameSite=Lax";

/// Extract a named cookie value from headers.
pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            if k.trim() == name {
                Some(v.trim().to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{router, test_support::test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use lectern_core::models::oidc::OidcState;
    use tower::ServiceExt;

    fn registered_tool() -> Tool {
        Tool {
            id: 0,
            name: "Quiz Tool".into(),
            client_id: "c1".into(),
            auth_url: "https://tool.test/auth".into(),
            target_link_url: "https://tool.test/deeplink".into(),
            target_launch_url: "https://tool.test/launch".into(),
            key_set_url: String::new(),
            created_at: Utc::now(),
        }
    }

    fn launch_state(state: &str, resource_link_id: &str) -> OidcState {
        OidcState {
            state: state.into(),
            client_id: "c1".into(),
            target_link_uri: "https://tool.test/launch".into(),
            resource_link_id: resource_link_id.into(),
            context_id: "ctx-1".into(),
            expires_at: Utc::now() + Duration::minutes(15),
        }
    }

    fn extract_form_value(page: &str, field: &str) -> String {
        let marker = format!("name=\"{field}\" value=\"");
        page.split(&marker)
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default()
            .to_string()
    }

    async fn send_auth(
        app: axum::Router,
        uri: &str,
        cookie: Option<&str>,
    ) -> axum::http::Response<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = cookie {
            builder = builder.header("cookie", format!("lti_corr={value}"));
        }
        app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn happy_path_issues_verifiable_id_token() {
        let state = test_state().await;
        state.tools.register_tool(&registered_tool()).await.unwrap();
        state
            .validation
            .create_oidc_state(&launch_state("st-1", "rl-1"))
            .await
            .unwrap();

        let app = router(Arc::clone(&state));
        let resp = send_auth(
            app,
            "/api/oidc/auth?client_id=c1&redirect_uri=https://tool.test/launch&nonce=n-1&state=tool-state",
            Some("st-1"),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        // Cookie cleared on the way out.
        let set_cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(set_cookie.starts_with("lti_corr=;"));

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        assert!(page.contains(r#"action="https://tool.test/launch""#));
        assert_eq!(extract_form_value(&page, "state"), "tool-state");

        let id_token = extract_form_value(&page, "id_token");
        let header = jsonwebtoken::decode_header(&id_token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("test-kid"));

        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&["c1"]);
        let data = jsonwebtoken::decode::<serde_json::Value>(
            &id_token,
            state.keys.decoding_key(),
            &validation,
        )
        .unwrap();
        let claims = data.claims;

        assert_eq!(claims["iss"], "https://platform.test");
        assert_eq!(claims["nonce"], "n-1");
        assert_eq!(
            claims["https://purl.imsglobal.org/spec/lti/claim/message_type"],
            "LtiResourceLinkRequest"
        );
        assert_eq!(
            claims["https://purl.imsglobal.org/spec/lti/claim/version"],
            "1.3.0"
        );
        // resource_link_id present => student launch
        assert_eq!(
            claims["https://purl.imsglobal.org/spec/lti/claim/roles"][0],
            ROLE_STUDENT
        );
        assert_eq!(
            claims["https://purl.imsglobal.org/spec/lti/claim/resource_link"]["id"],
            "rl-1"
        );
        let endpoint = &claims["https://purl.imsglobal.org/spec/lti-ags/claim/endpoint"];
        assert_eq!(
            endpoint["lineitems"],
            "https://platform.test/api/ags/contexts/ctx-1/lineitems"
        );
        // No mapping exists yet: empty line item segment.
        assert_eq!(
            endpoint["lineitem"],
            "https://platform.test/api/ags/contexts/ctx-1/lineitems/"
        );
        assert_eq!(endpoint["scope"].as_array().unwrap().len(), 4);
        let nrps = &claims["https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice"];
        assert_eq!(
            nrps["context_memberships_url"],
            "https://platform.test/api/nrps/contexts/ctx-1/members"
        );
        assert_eq!(nrps["service_versions"][0], "2.0");
    }

    #[tokio::test]
    async fn mapped_line_item_appears_in_ags_claim() {
        let state = test_state().await;
        state.tools.register_tool(&registered_tool()).await.unwrap();
        state
            .validation
            .create_oidc_state(&launch_state("st-m", "rl-7"))
            .await
            .unwrap();
        let li = lectern_core::models::ags::LineItem {
            context_id: "ctx-1".into(),
            label: "Quiz".into(),
            score_maximum: 10.0,
            resource_link_id: "rl-7".into(),
            ..Default::default()
        };
        let line_item_id = state.scores.create_line_item(&li).await.unwrap();
        state
            .scores
            .create_line_item_mapping(line_item_id, "rl-7")
            .await
            .unwrap();

        let app = router(Arc::clone(&state));
        let resp = send_auth(
            app,
            "/api/oidc/auth?client_id=c1&redirect_uri=https://tool.test/launch&nonce=n",
            Some("st-m"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        let id_token = extract_form_value(&page, "id_token");
        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&["c1"]);
        let claims = jsonwebtoken::decode::<serde_json::Value>(
            &id_token,
            state.keys.decoding_key(),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(
            claims["https://purl.imsglobal.org/spec/lti-ags/claim/endpoint"]["lineitem"],
            format!("https://platform.test/api/ags/contexts/ctx-1/lineitems/{line_item_id}")
        );
    }

    #[tokio::test]
    async fn state_replay_rejected() {
        let state = test_state().await;
        state.tools.register_tool(&registered_tool()).await.unwrap();
        state
            .validation
            .create_oidc_state(&launch_state("st-2", ""))
            .await
            .unwrap();

        let uri = "/api/oidc/auth?client_id=c1&redirect_uri=https://tool.test/launch&nonce=n";
        let resp = send_auth(router(Arc::clone(&state)), uri, Some("st-2")).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send_auth(router(Arc::clone(&state)), uri, Some("st-2")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_cookie_rejected() {
        let state = test_state().await;
        state.tools.register_tool(&registered_tool()).await.unwrap();
        let resp = send_auth(
            router(state),
            "/api/oidc/auth?client_id=c1&redirect_uri=https://tool.test/launch",
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn redirect_mismatch_rejected() {
        let state = test_state().await;
        state.tools.register_tool(&registered_tool()).await.unwrap();
        state
            .validation
            .create_oidc_state(&launch_state("st-3", ""))
            .await
            .unwrap();
        let resp = send_auth(
            router(state),
            "/api/oidc/auth?client_id=c1&redirect_uri=https://evil.test/launch&nonce=n",
            Some("st-3"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stored_client_id_mismatch_rejected() {
        let state = test_state().await;
        state.tools.register_tool(&registered_tool()).await.unwrap();
        state
            .validation
            .create_oidc_state(&launch_state("st-4", ""))
            .await
            .unwrap();
        let resp = send_auth(
            router(state),
            "/api/oidc/auth?client_id=other&redirect_uri=https://tool.test/launch",
            Some("st-4"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deep_linking_request_carries_settings() {
        let state = test_state().await;
        state.tools.register_tool(&registered_tool()).await.unwrap();
        state
            .validation
            .create_oidc_state(&launch_state("st-5", ""))
            .await
            .unwrap();
        let resp = send_auth(
            router(Arc::clone(&state)),
            "/api/oidc/auth?client_id=c1&redirect_uri=https://tool.test/deeplink&nonce=n&lti_message_hint=deep_linking",
            Some("st-5"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        let id_token = extract_form_value(&page, "id_token");
        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&["c1"]);
        let claims = jsonwebtoken::decode::<serde_json::Value>(
            &id_token,
            state.keys.decoding_key(),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(
            claims["https://purl.imsglobal.org/spec/lti/claim/message_type"],
            "LtiDeepLinkingRequest"
        );
        let settings =
            &claims["https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings"];
        assert_eq!(
            settings["deep_link_return_url"],
            "https://platform.test/api/deeplink/return"
        );
        assert_eq!(settings["data"], "ctx-1");
        assert_eq!(settings["accept_types"][0], "ltiResourceLink");
        assert_eq!(settings["accept_multiple"], false);
        // No launch content selected: instructor role.
        assert_eq!(
            claims["https://purl.imsglobal.org/spec/lti/claim/roles"][0],
            ROLE_INSTRUCTOR
        );
    }

    #[test]
    fn subject_derivation_from_login_hint() {
        let (sub, name, email) = subject_from_login_hint("jdoe@school.edu");
        assert_eq!(sub, "jdoe@school.edu");
        assert_eq!(name.as_deref(), Some("jdoe"));
        assert_eq!(email.as_deref(), Some("jdoe@school.edu"));

        let (sub, name, email) = subject_from_login_hint("opaque-hint");
        assert_eq!(sub, "opaque-hint");
        assert!(name.is_none());
        assert!(email.is_none());

        let (sub, _, _) = subject_from_login_hint("");
        assert!(!sub.is_empty());
    }

    #[test]
    fn extract_cookie_parses_correctly() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "session=abc123; lti_corr=state-456; other=val".parse().unwrap(),
        );
        assert_eq!(
            extract_cookie(&headers, "lti_corr"),
            Some("state-456".to_string())
        );
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn redirect_validation_compares_scheme_host_path() {
        let tool = registered_tool();
        assert!(validate_redirect(&tool, "https://tool.test/launch", false).is_ok());
        assert!(validate_redirect(&tool, "http://tool.test/launch", false).is_err());
        assert!(validate_redirect(&tool, "https://tool.test/other", false).is_err());
        assert!(validate_redirect(&tool, "https://tool.test:444/launch", false).is_err());
        // Deep linking validates against the deep-link return target.
        assert!(validate_redirect(&tool, "https://tool.test/deeplink", true).is_ok());
        assert!(validate_redirect(&tool, "https://tool.test/launch", true).is_err());
    }
}
