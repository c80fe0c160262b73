//! SQLite implementations of the repository traits.
//!
//! Each store owns its own database file (and pool); multi-step invariants
//! run as single atomic statements or inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::db::repository::{
    AgsRepository, RosterRepository, ToolRepository, ValidationRepository,
};
use crate::db::schema;
use crate::error::{LecternError, Result};
use crate::models::{
    ags::{AgsResult, LineItem, Score},
    deeplink::DeepLinkSelection,
    oidc::{ConsumedState, OidcState},
    roster::Member,
    tool::Tool,
};

// -- Tools --

#[derive(Clone)]
pub struct SqliteToolRepository {
    pool: SqlitePool,
}

impl SqliteToolRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(path: &str) -> Result<Self> {
        Ok(Self::new(crate::db::new_sqlite(path, schema::TOOLS).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_tool(row: &sqlx::sqlite::SqliteRow) -> Tool {
    Tool {
        id: row.get("id"),
        name: row.get("name"),
        client_id: row.get("client_id"),
        auth_url: row.get("auth_url"),
        target_link_url: row.get("target_link_url"),
        target_launch_url: row.get("target_launch_url"),
        key_set_url: row.get("key_set_url"),
        created_at: row.get("created_at"),
    }
}

fn row_to_selection(row: &sqlx::sqlite::SqliteRow) -> DeepLinkSelection {
    DeepLinkSelection {
        id: row.get("id"),
        client_id: row.get("client_id"),
        tool_name: row.get("tool_name"),
        url: row.get("url"),
        content_item_json: row.get("content_item_json"),
        created_at: row.get("created_at"),
    }
}

const TOOL_COLUMNS: &str =
    "id, name, client_id, auth_url, target_link_url, target_launch_url, key_set_url, created_at";

#[async_trait]
impl ToolRepository for SqliteToolRepository {
    async fn health(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn register_tool(&self, tool: &Tool) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO tools (name, client_id, auth_url, target_link_url, target_launch_url, key_set_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tool.name)
        .bind(&tool.client_id)
        .bind(&tool.auth_url)
        .bind(&tool.target_link_url)
        .bind(&tool.target_launch_url)
        .bind(&tool.key_set_url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let rows = sqlx::query(&format!("SELECT {TOOL_COLUMNS} FROM tools ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_tool).collect())
    }

    async fn get_tool_by_client_id(&self, client_id: &str) -> Result<Option<Tool>> {
        let row = sqlx::query(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE client_id = ?"))
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_tool))
    }

    async fn get_tool_by_id(&self, id: i64) -> Result<Option<Tool>> {
        let row = sqlx::query(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_tool))
    }

    async fn delete_tool_by_id(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tools WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_deep_link_selection(&self, sel: &DeepLinkSelection) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO deeplink_selections (client_id, tool_name, url, content_item_json, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&sel.client_id)
        .bind(&sel.tool_name)
        .bind(&sel.url)
        .bind(&sel.content_item_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_deep_link_selections(&self) -> Result<Vec<DeepLinkSelection>> {
        let rows = sqlx::query(
            "SELECT id, client_id, tool_name, url, content_item_json, created_at
             FROM deeplink_selections ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_selection).collect())
    }

    async fn get_deep_link_selection(&self, id: i64) -> Result<Option<DeepLinkSelection>> {
        let row = sqlx::query(
            "SELECT id, client_id, tool_name, url, content_item_json, created_at
             FROM deeplink_selections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_selection))
    }

    async fn delete_deep_link_selection(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM deeplink_selections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Validation --

#[derive(Clone)]
pub struct SqliteValidationRepository {
    pool: SqlitePool,
}

impl SqliteValidationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(path: &str) -> Result<Self> {
        Ok(Self::new(
            crate::db::new_sqlite(path, schema::VALIDATION).await?,
        ))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ValidationRepository for SqliteValidationRepository {
    async fn create_oidc_state(&self, state: &OidcState) -> Result<()> {
        let now = Utc::now();
        // Opportunistic GC of dead rows; failures are not fatal.
        let _ = sqlx::query("DELETE FROM oidc_states WHERE expires_at < ? OR used = 1")
            .bind(now)
            .execute(&self.pool)
            .await;

        sqlx::query(
            "INSERT INTO oidc_states (state, client_id, target_link_uri, resource_link_id, context_id, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.state)
        .bind(&state.client_id)
        .bind(&state.target_link_uri)
        .bind(&state.resource_link_id)
        .bind(&state.context_id)
        .bind(state.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_oidc_state(&self, state: &str) -> Result<Option<ConsumedState>> {
        // Single atomic update: the losing racer, an expired row, and a
        // missing row all look identical (zero rows returned).
        let row = sqlx::query(
            "UPDATE oidc_states SET used = 1
             WHERE state = ? AND used = 0 AND expires_at > ?
             RETURNING client_id, target_link_uri, resource_link_id, context_id",
        )
        .bind(state)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ConsumedState {
            client_id: r.get("client_id"),
            target_link_uri: r.get("target_link_uri"),
            resource_link_id: r.get("resource_link_id"),
            context_id: r.get("context_id"),
        }))
    }

    async fn try_use_client_assertion_jti(
        &self,
        jti: &str,
        client_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        if jti.is_empty() {
            return Err(LecternError::Invalid("empty jti".into()));
        }
        // Insert-if-absent; an existing row only gives way when it has
        // already expired. rows_affected == 0 means replay.
        let result = sqlx::query(
            "INSERT INTO client_assertion_jtis (jti, client_id, expires_at, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(jti) DO UPDATE
             SET client_id = excluded.client_id,
                 expires_at = excluded.expires_at,
                 created_at = excluded.created_at
             WHERE client_assertion_jtis.expires_at <= excluded.created_at",
        )
        .bind(jti)
        .bind(client_id)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- AGS --

#[derive(Clone)]
pub struct SqliteAgsRepository {
    pool: SqlitePool,
}

impl SqliteAgsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(path: &str) -> Result<Self> {
        Ok(Self::new(crate::db::new_sqlite(path, schema::SCORES).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_line_item(row: &sqlx::sqlite::SqliteRow) -> LineItem {
    LineItem {
        id: row.get("id"),
        context_id: row.get("context_id"),
        label: row.get("label"),
        resource_id: row.get("resource_id"),
        resource_link_id: row.get("resource_link_id"),
        tag: row.get("tag"),
        score_maximum: row.get("score_maximum"),
        start_at: row.get("start_at"),
        end_at: row.get("end_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const LINE_ITEM_COLUMNS: &str = "id, context_id, label, resource_id, resource_link_id, tag, \
                                 score_maximum, start_at, end_at, created_at, updated_at";

#[async_trait]
impl AgsRepository for SqliteAgsRepository {
    async fn create_line_item(&self, item: &LineItem) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO line_items (context_id, label, resource_id, resource_link_id, tag, score_maximum, start_at, end_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.context_id)
        .bind(&item.label)
        .bind(&item.resource_id)
        .bind(&item.resource_link_id)
        .bind(&item.tag)
        .bind(item.score_maximum)
        .bind(item.start_at)
        .bind(item.end_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_line_items(&self, context_id: &str) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM line_items WHERE context_id = ? ORDER BY id ASC"
        ))
        .bind(context_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_line_item).collect())
    }

    async fn get_line_item(&self, id: i64, context_id: &str) -> Result<Option<LineItem>> {
        let row = sqlx::query(&format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM line_items WHERE id = ? AND context_id = ?"
        ))
        .bind(id)
        .bind(context_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_line_item))
    }

    async fn update_line_item(&self, item: &LineItem) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE line_items
             SET label = ?, resource_id = ?, resource_link_id = ?, tag = ?, score_maximum = ?, start_at = ?, end_at = ?, updated_at = ?
             WHERE id = ? AND context_id = ?",
        )
        .bind(&item.label)
        .bind(&item.resource_id)
        .bind(&item.resource_link_id)
        .bind(&item.tag)
        .bind(item.score_maximum)
        .bind(item.start_at)
        .bind(item.end_at)
        .bind(Utc::now())
        .bind(item.id)
        .bind(&item.context_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_line_item(&self, id: i64, context_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM line_items WHERE id = ? AND context_id = ?")
            .bind(id)
            .bind(context_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_result_from_score(
        &self,
        line_item_id: i64,
        context_id: &str,
        score: &Score,
    ) -> Result<()> {
        let timestamp = score.timestamp.unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO results (line_item_id, context_id, user_id, result_score, result_maximum, comment, timestamp, activity_progress, grading_progress)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(line_item_id, context_id, user_id)
             DO UPDATE SET result_score = excluded.result_score,
                           result_maximum = excluded.result_maximum,
                           comment = excluded.comment,
                           timestamp = excluded.timestamp,
                           activity_progress = excluded.activity_progress,
                           grading_progress = excluded.grading_progress",
        )
        .bind(line_item_id)
        .bind(context_id)
        .bind(&score.user_id)
        .bind(score.score_given)
        .bind(score.score_maximum)
        .bind(&score.comment)
        .bind(timestamp)
        .bind(&score.activity_progress)
        .bind(&score.grading_progress)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_results_by_line_item(
        &self,
        line_item_id: i64,
        context_id: &str,
    ) -> Result<Vec<AgsResult>> {
        let rows = sqlx::query(
            "SELECT user_id, result_score, result_maximum, comment, timestamp, activity_progress, grading_progress
             FROM results WHERE line_item_id = ? AND context_id = ? ORDER BY user_id ASC",
        )
        .bind(line_item_id)
        .bind(context_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| AgsResult {
                user_id: row.get("user_id"),
                result_score: row.get("result_score"),
                result_maximum: row.get("result_maximum"),
                comment: row.get("comment"),
                timestamp: row.get("timestamp"),
                activity_progress: row.get("activity_progress"),
                grading_progress: row.get("grading_progress"),
            })
            .collect())
    }

    async fn create_line_item_mapping(
        &self,
        line_item_id: i64,
        resource_link_id: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO line_item_mappings (line_item_id, resource_link_id) VALUES (?, ?)")
            .bind(line_item_id)
            .bind(resource_link_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_line_item_id_by_resource_link_id(
        &self,
        resource_link_id: &str,
    ) -> Result<Option<i64>> {
        let row =
            sqlx::query("SELECT line_item_id FROM line_item_mappings WHERE resource_link_id = ?")
                .bind(resource_link_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.get("line_item_id")))
    }
}

// -- Roster --

#[derive(Clone)]
pub struct SqliteRosterRepository {
    pool: SqlitePool,
}

impl SqliteRosterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(path: &str) -> Result<Self> {
        Ok(Self::new(crate::db::new_sqlite(path, schema::ROSTER).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_member(row: &sqlx::sqlite::SqliteRow) -> Member {
    let roles_json: String = row.get("roles_json");
    Member {
        user_id: row.get("user_id"),
        name: row.get("name"),
        given_name: row.get("given_name"),
        family_name: row.get("family_name"),
        email: row.get("email"),
        roles: serde_json::from_str(&roles_json).unwrap_or_default(),
        status: row.get("status"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl RosterRepository for SqliteRosterRepository {
    async fn list_members_page(
        &self,
        context_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Member>, i64)> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM members WHERE context_id = ?")
            .bind(context_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let rows = sqlx::query(
            "SELECT user_id, name, given_name, family_name, email, roles_json, status, updated_at
             FROM members WHERE context_id = ? ORDER BY id ASC LIMIT ? OFFSET ?",
        )
        .bind(context_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.iter().map(row_to_member).collect(), total))
    }

    async fn upsert_member(&self, context_id: &str, member: &Member) -> Result<()> {
        let roles_json = serde_json::to_string(&member.roles)
            .map_err(|e| LecternError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO members (context_id, user_id, name, given_name, family_name, email, roles_json, status, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(context_id, user_id)
             DO UPDATE SET name = excluded.name,
                           given_name = excluded.given_name,
                           family_name = excluded.family_name,
                           email = excluded.email,
                           roles_json = excluded.roles_json,
                           status = excluded.status,
                           updated_at = excluded.updated_at",
        )
        .bind(context_id)
        .bind(&member.user_id)
        .bind(&member.name)
        .bind(&member.given_name)
        .bind(&member.family_name)
        .bind(&member.email)
        .bind(roles_json)
        .bind(&member.status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_member(&self, context_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM members WHERE context_id = ? AND user_id = ?")
            .bind(context_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
