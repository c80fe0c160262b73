//! LTI claim URIs, scope URIs, and the JWT claim structures the platform
//! signs and verifies.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const CLAIM_DL_DATA: &str = "https://purl.imsglobal.org/spec/lti-dl/claim/data";
pub const CLAIM_DL_CONTENT_ITEMS: &str =
    "https://purl.imsglobal.org/spec/lti-dl/claim/content_items";

pub const SCOPE_LINEITEM_READONLY: &str =
    "https://purl.imsglobal.org/spec/lti-ags/scope/lineitem.readonly";
pub const SCOPE_LINEITEM: &str = "https://purl.imsglobal.org/spec/lti-ags/scope/lineitem";
pub const SCOPE_RESULT_READONLY: &str =
    "https://purl.imsglobal.org/spec/lti-ags/scope/result.readonly";
pub const SCOPE_SCORE: &str = "https://purl.imsglobal.org/spec/lti-ags/scope/score";
pub const SCOPE_MEMBERSHIP_READONLY: &str =
    "https://purl.imsglobal.org/spec/lti-nrps/scope/contextmembership.readonly";

pub const ROLE_INSTRUCTOR: &str =
    "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Instructor";
pub const ROLE_STUDENT: &str =
    "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Student";

pub const MESSAGE_TYPE_RESOURCE_LINK: &str = "LtiResourceLinkRequest";
pub const MESSAGE_TYPE_DEEP_LINKING: &str = "LtiDeepLinkingRequest";

pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// All AGS scopes the platform advertises on a resource launch.
pub fn ags_scopes() -> Vec<String> {
    vec![
        SCOPE_LINEITEM_READONLY.to_string(),
        SCOPE_LINEITEM.to_string(),
        SCOPE_RESULT_READONLY.to_string(),
        SCOPE_SCORE.to_string(),
    ]
}

// -- id_token --

#[derive(Debug, Serialize)]
pub struct ResourceLinkClaim {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct AgsEndpointClaim {
    pub lineitem: String,
    pub lineitems: String,
    pub scope: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NrpsClaim {
    pub context_memberships_url: String,
    pub service_versions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceClaim {
    pub endpoint: String,
    pub scope: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeepLinkingSettings {
    pub deep_link_return_url: String,
    /// Echoed back by the tool; carries the launch context id.
    pub data: String,
    pub accept_types: Vec<String>,
    pub accept_presentation_document_targets: Vec<String>,
    pub accept_multiple: bool,
}

/// The LTI id_token issued by the authorization endpoint. Claim URIs are
/// fixed by the 1EdTech specification.
#[derive(Debug, Serialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
    pub version: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
    pub message_type: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    pub deployment_id: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri")]
    pub target_link_uri: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/roles")]
    pub roles: Vec<String>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_link: Option<ResourceLinkClaim>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub ags_endpoint: Option<AgsEndpointClaim>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice",
        skip_serializing_if = "Option::is_none"
    )]
    pub nrps: Option<NrpsClaim>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti/claim/service",
        skip_serializing_if = "Option::is_none"
    )]
    pub services: Option<Vec<ServiceClaim>>,
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings",
        skip_serializing_if = "Option::is_none"
    )]
    pub deep_linking_settings: Option<DeepLinkingSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// -- access token --

/// The access token issued by the token endpoint and checked by the
/// service guard. `aud` and `scope` keep loose types so tokens from older
/// platform builds (string audience, list scope) still parse.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: serde_json::Value,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default)]
    pub scope: serde_json::Value,
}

/// Claims peeked or validated from a tool's client assertion.
#[derive(Debug, Deserialize)]
pub struct ClientAssertionClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub aud: serde_json::Value,
}

/// Collect the scope claim into a set, accepting the RFC 6749
/// space-delimited string form or a list of strings.
pub fn scope_set(claim: &serde_json::Value) -> HashSet<String> {
    match claim {
        serde_json::Value::String(s) => {
            s.split_whitespace().map(|p| p.to_string()).collect()
        }
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => HashSet::new(),
    }
}

/// A random URL-safe identifier: 16 bytes, base64url without padding.
/// Used for anonymous subjects and access-token JTIs.
pub fn random_subject() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
