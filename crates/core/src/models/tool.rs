//! Tool registration model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered LTI tool. `client_id` is the stable trust anchor; the three
/// URLs drive the launch redirect chain and JWKS discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub client_id: String,
    /// OIDC authorization redirect fallback.
    #[serde(default)]
    pub auth_url: String,
    /// Deep-linking response redirect target.
    #[serde(default)]
    pub target_link_url: String,
    /// Resource-launch redirect target.
    #[serde(default)]
    pub target_launch_url: String,
    /// The tool's JWKS endpoint.
    #[serde(default)]
    pub key_set_url: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
