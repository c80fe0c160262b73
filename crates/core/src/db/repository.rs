use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    ags::{AgsResult, LineItem, Score},
    deeplink::DeepLinkSelection,
    oidc::{ConsumedState, OidcState},
    roster::Member,
    tool::Tool,
};

/// Tool registrations and persisted deep-link selections.
#[async_trait]
pub trait ToolRepository: Send + Sync {
    /// Verify the backing storage responds.
    async fn health(&self) -> Result<()>;
    /// Insert a new tool registration and return its id.
    async fn register_tool(&self, tool: &Tool) -> Result<i64>;
    async fn list_tools(&self) -> Result<Vec<Tool>>;
    async fn get_tool_by_client_id(&self, client_id: &str) -> Result<Option<Tool>>;
    async fn get_tool_by_id(&self, id: i64) -> Result<Option<Tool>>;
    async fn delete_tool_by_id(&self, id: i64) -> Result<bool>;

    async fn create_deep_link_selection(&self, sel: &DeepLinkSelection) -> Result<i64>;
    async fn list_deep_link_selections(&self) -> Result<Vec<DeepLinkSelection>>;
    async fn get_deep_link_selection(&self, id: i64) -> Result<Option<DeepLinkSelection>>;
    async fn delete_deep_link_selection(&self, id: i64) -> Result<bool>;
}

/// Security validation state: one-shot OIDC launch states and consumed
/// client-assertion JTIs.
#[async_trait]
pub trait ValidationRepository: Send + Sync {
    /// Persist a launch state. Expired or used rows may be garbage
    /// collected opportunistically.
    async fn create_oidc_state(&self, state: &OidcState) -> Result<()>;
    /// Atomically consume a state. Returns `None` when the state is
    /// missing, already used, or expired — the three are indistinguishable
    /// to callers. Exactly one concurrent consumer succeeds.
    async fn consume_oidc_state(&self, state: &str) -> Result<Option<ConsumedState>>;
    /// Record a client-assertion `jti`. Returns `true` iff newly recorded;
    /// an unexpired existing row is a replay. Empty `jti` is an error.
    async fn try_use_client_assertion_jti(
        &self,
        jti: &str,
        client_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Assignment & Grade Services persistence. All line-item operations are
/// scoped by `(id, context_id)`; a context mismatch behaves as not-found.
#[async_trait]
pub trait AgsRepository: Send + Sync {
    async fn create_line_item(&self, item: &LineItem) -> Result<i64>;
    async fn list_line_items(&self, context_id: &str) -> Result<Vec<LineItem>>;
    async fn get_line_item(&self, id: i64, context_id: &str) -> Result<Option<LineItem>>;
    /// Returns `false` when no row matched the `(id, context_id)` scope.
    async fn update_line_item(&self, item: &LineItem) -> Result<bool>;
    /// Returns `false` when no row matched the `(id, context_id)` scope.
    async fn delete_line_item(&self, id: i64, context_id: &str) -> Result<bool>;

    /// Last write wins per `(line_item_id, context_id, user_id)`.
    async fn upsert_result_from_score(
        &self,
        line_item_id: i64,
        context_id: &str,
        score: &Score,
    ) -> Result<()>;
    async fn list_results_by_line_item(
        &self,
        line_item_id: i64,
        context_id: &str,
    ) -> Result<Vec<AgsResult>>;

    /// Create the one-to-one binding between a line item and a resource
    /// link. Both columns are unique; a violation is a hard error.
    async fn create_line_item_mapping(
        &self,
        line_item_id: i64,
        resource_link_id: &str,
    ) -> Result<()>;
    async fn get_line_item_id_by_resource_link_id(
        &self,
        resource_link_id: &str,
    ) -> Result<Option<i64>>;
}

/// NRPS membership storage, paginated per context.
#[async_trait]
pub trait RosterRepository: Send + Sync {
    /// Returns one page of members plus the total count for the context.
    async fn list_members_page(
        &self,
        context_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Member>, i64)>;
    async fn upsert_member(&self, context_id: &str, member: &Member) -> Result<()>;
    async fn delete_member(&self, context_id: &str, user_id: &str) -> Result<bool>;
}
