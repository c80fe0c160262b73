//! Admin tool registry endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::debug;

use lectern_core::models::tool::Tool;

use crate::error::ApiError;
use crate::routes::AppState;

/// POST /api/tools
pub async fn create_tool(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Response, ApiError> {
    let tool: Tool =
        serde_json::from_str(&body).map_err(|_| ApiError::bad_request("invalid JSON body"))?;
    if tool.name.trim().is_empty() || tool.client_id.trim().is_empty() {
        return Err(ApiError::bad_request("name and client_id are required"));
    }

    let id = state
        .tools
        .register_tool(&tool)
        .await
        .map_err(|e| ApiError::internal(format!("failed to register tool: {e}")))?;
    debug!(id, client_id = %tool.client_id, "registered tool");

    let created = state
        .tools
        .get_tool_by_id(id)
        .await?
        .ok_or_else(|| ApiError::internal("registered tool vanished"))?;
    Ok(Json(json!({"id": id, "created_at": created.created_at})).into_response())
}

/// GET /api/tools
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let tools = state.tools.list_tools().await?;
    Ok(Json(tools).into_response())
}

/// GET /api/tools/{id}
pub async fn get_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::bad_request("invalid id"))?;
    let tool = state
        .tools
        .get_tool_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("tool not found"))?;
    Ok(Json(tool).into_response())
}

/// DELETE /api/tools/{id}
pub async fn delete_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::bad_request("invalid id"))?;
    if !state.tools.delete_tool_by_id(id).await? {
        return Err(ApiError::not_found("tool not found"));
    }
    debug!(id, "deleted tool");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{router, test_support::test_state};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(resp: axum::http::Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_list_get_delete_round_trip() {
        let state = test_state().await;

        let resp = router(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/tools")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"Quiz Tool","client_id":"c1","auth_url":"https://tool/auth","key_set_url":"https://tool/jwks"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let created = body_json(resp).await;
        let id = created["id"].as_i64().unwrap();
        assert!(id > 0);
        assert!(created["created_at"].is_string());

        let resp = router(Arc::clone(&state))
            .oneshot(Request::builder().uri("/api/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(resp).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["client_id"], "c1");

        let resp = router(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .uri(format!("/api/tools/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let fetched = body_json(resp).await;
        assert_eq!(fetched["name"], "Quiz Tool");

        let resp = router(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/tools/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/tools/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_requires_name_and_client_id() {
        let state = test_state().await;
        let resp = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/tools")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"  ","client_id":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_is_empty_array_when_no_tools() {
        let state = test_state().await;
        let resp = router(state)
            .oneshot(Request::builder().uri("/api/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(resp).await;
        assert_eq!(listed, serde_json::json!([]));
    }

    #[tokio::test]
    async fn invalid_id_is_400() {
        let state = test_state().await;
        let resp = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/tools/abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
