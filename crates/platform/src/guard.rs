//! Bearer-token authorization for the AGS and NRPS service endpoints.
//!
//! AGS endpoints pass when the token carries at least one of the required
//! scopes; NRPS requires all of them. The two semantics differ by
//! historical IMS convention.

use axum::http::{header, HeaderMap, StatusCode};
use jsonwebtoken::{decode, Algorithm, Validation};

use lectern_core::keys::PlatformKeys;

use crate::claims::{scope_set, AccessTokenClaims};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
pub enum ScopeMode {
    /// At least one required scope must be present (AGS).
    AnyOf,
    /// Every required scope must be present (NRPS).
    AllOf,
}

/// Validate the `Authorization: Bearer` token against the platform key and
/// enforce the scope policy. Returns the token claims for the handler.
pub fn authorize_bearer(
    headers: &HeaderMap,
    keys: &PlatformKeys,
    issuer: &str,
    realm: &str,
    mode: ScopeMode,
    required: &[&str],
) -> Result<AccessTokenClaims, ApiError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if auth.len() < 7 || !auth[..7].eq_ignore_ascii_case("bearer ") {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_request",
            "missing bearer token",
        )
        .with_challenge(format!(
            r#"Bearer realm="{realm}", error="invalid_request", error_description="missing bearer token""#
        )));
    }
    let token = auth[7..].trim();

    let audience = format!("{issuer}/api");
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[audience.as_str()]);
    validation.set_required_spec_claims(&["exp", "aud"]);

    let data = decode::<AccessTokenClaims>(token, keys.decoding_key(), &validation).map_err(
        |_| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "expired or invalid token",
            )
            .with_challenge(format!(
                r#"Bearer realm="{realm}", error="invalid_token", error_description="expired or invalid token""#
            ))
        },
    )?;

    let have = scope_set(&data.claims.scope);
    let satisfied = match mode {
        ScopeMode::AnyOf => required.iter().any(|scope| have.contains(*scope)),
        ScopeMode::AllOf => required.iter().all(|scope| have.contains(*scope)),
    };
    if !satisfied {
        let wanted = required.join(" ");
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "insufficient_scope",
            "token lacks the required scope",
        )
        .with_challenge(format!(
            r#"Bearer realm="{realm}", error="insufficient_scope", scope="{wanted}""#
        )));
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{SCOPE_LINEITEM, SCOPE_LINEITEM_READONLY, SCOPE_MEMBERSHIP_READONLY};
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, Header};
    use lectern_core::keys;

    const ISSUER: &str = "https://platform.test";

    fn test_keys() -> PlatformKeys {
        let pem = keys::generate_key_pem().unwrap();
        PlatformKeys::from_pem(&pem, "guard-kid".into()).unwrap()
    }

    fn issue(keys: &PlatformKeys, aud: serde_json::Value, scope: serde_json::Value, ttl: i64) -> String {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            iss: ISSUER.into(),
            sub: "c1".into(),
            aud,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl)).timestamp(),
            jti: "jti".into(),
            scope,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(keys.kid().to_string());
        encode(&header, &claims, keys.encoding_key()).unwrap()
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn missing_header_is_401_invalid_request() {
        let keys = test_keys();
        let err = authorize_bearer(
            &HeaderMap::new(),
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM],
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[test]
    fn valid_token_with_any_scope_passes() {
        let keys = test_keys();
        let token = issue(
            &keys,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!(SCOPE_LINEITEM),
            60,
        );
        let claims = authorize_bearer(
            &bearer_headers(&token),
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM_READONLY, SCOPE_LINEITEM],
        )
        .unwrap();
        assert_eq!(claims.sub, "c1");
    }

    #[test]
    fn bearer_prefix_is_case_insensitive() {
        let keys = test_keys();
        let token = issue(
            &keys,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!(SCOPE_LINEITEM),
            60,
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("bearer {token}").parse().unwrap(),
        );
        assert!(authorize_bearer(
            &headers,
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM],
        )
        .is_ok());
    }

    #[test]
    fn wrong_audience_is_401_invalid_token() {
        let keys = test_keys();
        let token = issue(
            &keys,
            serde_json::json!(["https://other/api"]),
            serde_json::json!(SCOPE_LINEITEM),
            60,
        );
        let err = authorize_bearer(
            &bearer_headers(&token),
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM],
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code(), "invalid_token");
    }

    #[test]
    fn expired_token_is_401() {
        let keys = test_keys();
        let token = issue(
            &keys,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!(SCOPE_LINEITEM),
            -120,
        );
        let err = authorize_bearer(
            &bearer_headers(&token),
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM],
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn insufficient_scope_is_403() {
        let keys = test_keys();
        let token = issue(
            &keys,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!("some-unrelated-scope"),
            60,
        );
        let err = authorize_bearer(
            &bearer_headers(&token),
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM],
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code(), "insufficient_scope");
    }

    #[test]
    fn all_of_requires_every_scope() {
        let keys = test_keys();
        let token = issue(
            &keys,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!(format!("{SCOPE_MEMBERSHIP_READONLY} {SCOPE_LINEITEM}")),
            60,
        );
        assert!(authorize_bearer(
            &bearer_headers(&token),
            &keys,
            ISSUER,
            "NRPS",
            ScopeMode::AllOf,
            &[SCOPE_MEMBERSHIP_READONLY, SCOPE_LINEITEM],
        )
        .is_ok());

        let partial = issue(
            &keys,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!(SCOPE_MEMBERSHIP_READONLY),
            60,
        );
        let err = authorize_bearer(
            &bearer_headers(&partial),
            &keys,
            ISSUER,
            "NRPS",
            ScopeMode::AllOf,
            &[SCOPE_MEMBERSHIP_READONLY, SCOPE_LINEITEM],
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn scope_list_form_accepted() {
        let keys = test_keys();
        let token = issue(
            &keys,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!([SCOPE_LINEITEM, SCOPE_LINEITEM_READONLY]),
            60,
        );
        assert!(authorize_bearer(
            &bearer_headers(&token),
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM],
        )
        .is_ok());
    }

    #[test]
    fn token_signed_by_other_key_rejected() {
        let keys = test_keys();
        let other = test_keys();
        let token = issue(
            &other,
            serde_json::json!([format!("{ISSUER}/api")]),
            serde_json::json!(SCOPE_LINEITEM),
            60,
        );
        assert!(authorize_bearer(
            &bearer_headers(&token),
            &keys,
            ISSUER,
            "lti-ags",
            ScopeMode::AnyOf,
            &[SCOPE_LINEITEM],
        )
        .is_err());
    }
}
