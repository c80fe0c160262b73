//! Persisted deep-link content selections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A content item chosen by a tool during Deep Linking. Append-only; the
/// verbatim item JSON is retained so later launches can reconstruct it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepLinkSelection {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub url: String,
    pub content_item_json: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
