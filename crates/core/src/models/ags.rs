//! Assignment & Grade Services models: line items, scores, results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A gradable column within a context. The `id` and `context_id` are
/// conveyed via the URL path in the AGS API, not the JSON payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub context_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_link_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default)]
    pub score_maximum: f64,
    #[serde(default, rename = "startDateTime", skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "endDateTime", skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A score POST payload. Upserted into a [`AgsResult`] row keyed by
/// `(line_item_id, context_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub user_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_given: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub activity_progress: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grading_progress: String,
}

/// The latest recorded result per user for a line item. Last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgsResult {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub activity_progress: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grading_progress: String,
}
