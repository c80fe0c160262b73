//! Router assembly and cross-cutting HTTP concerns.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use lectern_core::config::PlatformConfig;
use lectern_core::db::repository::{
    AgsRepository, RosterRepository, ToolRepository, ValidationRepository,
};
use lectern_core::jwks_cache::JwksCache;
use lectern_core::keys::PlatformKeys;

use crate::{ags, deeplink, launch, nrps, oauth2, oidc, selections, tools};

/// Request bodies above this size are rejected.
const MAX_BODY_BYTES: usize = 2_100_000;

/// Shared state for all protocol routes.
pub struct AppState {
    pub tools: Arc<dyn ToolRepository>,
    pub validation: Arc<dyn ValidationRepository>,
    pub scores: Arc<dyn AgsRepository>,
    pub roster: Arc<dyn RosterRepository>,
    pub keys: Arc<PlatformKeys>,
    pub jwks_cache: Arc<JwksCache>,
    pub config: PlatformConfig,
}

/// Build the platform router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        // Platform metadata/JWKS
        .route("/.well-known/jwks.json", get(platform_jwks))
        .route("/api/.well-known/jwks.json", get(platform_jwks))
        // LTI launch (3rd-party initiated login)
        .route("/api/launch/start", post(launch::launch_start))
        // OIDC auth endpoint (issues id_token via form_post)
        .route("/api/oidc/auth", get(oidc::authorize).post(oidc::authorize))
        // Deep Linking return endpoint (form_post from tool)
        .route(
            "/api/deeplink/return",
            get(deeplink::deeplink_return).post(deeplink::deeplink_return),
        )
        .route("/api/oauth2/token", post(oauth2::token))
        // Admin tool registry
        .route("/api/tools", get(tools::list_tools).post(tools::create_tool))
        .route(
            "/api/tools/:id",
            get(tools::get_tool).delete(tools::delete_tool),
        )
        // Deep link selections (list/get/delete)
        .route("/api/deeplink/selections", get(selections::list_selections))
        .route(
            "/api/deeplink/selections/:id",
            get(selections::get_selection).delete(selections::delete_selection),
        )
        // AGS endpoints (context-scoped)
        .route(
            "/api/ags/contexts/:contextId/lineitems",
            get(ags::list_line_items).post(ags::create_line_item),
        )
        .route(
            "/api/ags/contexts/:contextId/lineitems/:lineItemId",
            get(ags::get_line_item)
                .put(ags::update_line_item)
                .delete(ags::delete_line_item),
        )
        .route(
            "/api/ags/contexts/:contextId/lineitems/:lineItemId/scores",
            post(ags::post_score),
        )
        .route(
            "/api/ags/contexts/:contextId/lineitems/:lineItemId/results",
            get(ags::list_results),
        )
        // NRPS endpoints (context-scoped)
        .route(
            "/api/nrps/contexts/:contextId/members",
            get(nrps::list_members).post(nrps::upsert_member),
        )
        .route(
            "/api/nrps/contexts/:contextId/members/:userId",
            axum::routing::delete(nrps::delete_member),
        )
        .layer(middleware::from_fn(cors))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.tools.health().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unhealthy", "error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Serve the platform JWKS (public keys for id_token verification by tools).
async fn platform_jwks(State(state): State<Arc<AppState>>) -> Response {
    Json(state.keys.jwks().clone()).into_response()
}

/// Permissive CORS for the admin frontend; preflights short-circuit to 204.
async fn cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response);
        return response;
    }
    let mut response = next.run(req).await;
    apply_cors_headers(&mut response);
    response
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,PUT,PATCH,DELETE,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use lectern_core::db::sqlite::{
        SqliteAgsRepository, SqliteRosterRepository, SqliteToolRepository,
        SqliteValidationRepository,
    };
    use lectern_core::db::{new_sqlite_memory, schema};
    use lectern_core::keys;

    /// Build an [`AppState`] backed by in-memory stores and a fresh
    /// signing key.
    pub async fn test_state() -> Arc<AppState> {
        test_state_with_issuer("https://platform.test").await
    }

    pub async fn test_state_with_issuer(issuer: &str) -> Arc<AppState> {
        let pem = keys::generate_key_pem().unwrap();
        let keys = PlatformKeys::from_pem(&pem, "test-kid".into()).unwrap();
        let config = PlatformConfig {
            issuer: issuer.into(),
            ..Default::default()
        };
        Arc::new(AppState {
            tools: Arc::new(SqliteToolRepository::new(
                new_sqlite_memory(schema::TOOLS).await.unwrap(),
            )),
            validation: Arc::new(SqliteValidationRepository::new(
                new_sqlite_memory(schema::VALIDATION).await.unwrap(),
            )),
            scores: Arc::new(SqliteAgsRepository::new(
                new_sqlite_memory(schema::SCORES).await.unwrap(),
            )),
            roster: Arc::new(SqliteRosterRepository::new(
                new_sqlite_memory(schema::ROSTER).await.unwrap(),
            )),
            keys: Arc::new(keys),
            jwks_cache: Arc::new(JwksCache::default()),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_ok() {
        let state = test_support::test_state().await;
        let app = router(state);
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn jwks_served_on_both_paths() {
        let state = test_support::test_state().await;
        for path in ["/.well-known/jwks.json", "/api/.well-known/jwks.json"] {
            let app = router(Arc::clone(&state));
            let resp = app
                .oneshot(HttpRequest::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let jwks: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(jwks["keys"][0]["kty"], "RSA");
            assert_eq!(jwks["keys"][0]["kid"], "test-kid");
        }
    }

    #[tokio::test]
    async fn options_preflight_returns_204_with_cors() {
        let state = test_support::test_state().await;
        let app = router(state);
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/tools")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn cors_headers_on_regular_responses() {
        let state = test_support::test_state().await;
        let app = router(state);
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
