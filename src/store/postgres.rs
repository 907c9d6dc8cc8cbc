use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;
use uuid::Uuid;

use super::models::*;
use super::{EntityStore, StoreError};
use crate::audit::{AuditEntry, AuditSink};
use crate::config::DatabaseConfig;
use crate::rbac::Role;
use crate::security::sanitizer::escape_like_pattern;

const NODE_COLUMNS: &str = "id, title, description, type, is_public, user_id, parent_id, \
     sort_order, created_at, updated_at, deleted_at";

const BLOCK_COLUMNS: &str = "id, node_id, user_id, title, content, block_theme_id, sort_order, \
     created_at, updated_at, deleted_at";

const USER_COLUMNS: &str = "id, email, name AS display_name, role, created_at";

/// Themes carry a live block count computed on read
const THEME_SELECT: &str = "SELECT t.id, t.title, t.description, t.creator_id, t.created_at, t.updated_at, \
     (SELECT COUNT(*) FROM blocks b WHERE b.block_theme_id = t.id AND b.deleted_at IS NULL) AS block_count \
     FROM block_themes t";

/// Managed Postgres datastore
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not set".into()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to datastore");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_theme(&self, id: Uuid) -> Result<Option<Theme>, StoreError> {
        let sql = format!("{} WHERE t.id = $1", THEME_SELECT);
        Ok(sqlx::query_as::<_, Theme>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// Unique violations surface as `Conflict`
fn conflict_or(err: sqlx::Error, message: &str) -> StoreError {
    let unique_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505");
    if unique_violation {
        StoreError::Conflict(message.to_string())
    } else {
        StoreError::Sqlx(err)
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn list_nodes(&self, viewer: Uuid, skip: i64, limit: i64) -> Result<Vec<Node>, StoreError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE deleted_at IS NULL AND (is_public OR user_id = $1) \
             ORDER BY updated_at DESC OFFSET $2 LIMIT $3",
            NODE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Node>(&sql)
            .bind(viewer)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, StoreError> {
        let sql = format!("SELECT {} FROM nodes WHERE id = $1 AND deleted_at IS NULL", NODE_COLUMNS);
        Ok(sqlx::query_as::<_, Node>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_node(&self, owner: Uuid, node: NewNode) -> Result<Node, StoreError> {
        let sql = format!(
            "INSERT INTO nodes (id, title, description, type, is_public, user_id, parent_id, sort_order) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0) RETURNING {}",
            NODE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Node>(&sql)
            .bind(Uuid::new_v4())
            .bind(node.title)
            .bind(node.description)
            .bind(node.node_type)
            .bind(node.is_public)
            .bind(owner)
            .bind(node.parent_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_node(&self, id: Uuid, changes: NodeChanges) -> Result<Option<Node>, StoreError> {
        let sql = format!(
            "UPDATE nodes SET title = COALESCE($2, title), description = COALESCE($3, description), \
             type = COALESCE($4, type), is_public = COALESCE($5, is_public), \
             parent_id = COALESCE($6, parent_id), updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {}",
            NODE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Node>(&sql)
            .bind(id)
            .bind(changes.title)
            .bind(changes.description)
            .bind(changes.node_type)
            .bind(changes.is_public)
            .bind(changes.parent_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn soft_delete_node(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE nodes SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_node_blocks(&self, node_id: Uuid) -> Result<Vec<Block>, StoreError> {
        let sql = format!(
            "SELECT {} FROM blocks WHERE node_id = $1 AND deleted_at IS NULL ORDER BY sort_order, created_at",
            BLOCK_COLUMNS
        );
        Ok(sqlx::query_as::<_, Block>(&sql)
            .bind(node_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_block(&self, id: Uuid) -> Result<Option<Block>, StoreError> {
        let sql = format!(
            "SELECT {} FROM blocks WHERE id = $1 AND deleted_at IS NULL \
             AND EXISTS (SELECT 1 FROM nodes n WHERE n.id = blocks.node_id AND n.deleted_at IS NULL)",
            BLOCK_COLUMNS
        );
        Ok(sqlx::query_as::<_, Block>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_block(&self, owner: Uuid, block: NewBlock) -> Result<Block, StoreError> {
        let sql = format!(
            "INSERT INTO blocks (id, node_id, user_id, title, content, block_theme_id, sort_order) \
             VALUES ($1, $2, $3, $4, $5, $6, \
             (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM blocks WHERE node_id = $2 AND deleted_at IS NULL)) \
             RETURNING {}",
            BLOCK_COLUMNS
        );
        Ok(sqlx::query_as::<_, Block>(&sql)
            .bind(Uuid::new_v4())
            .bind(block.node_id)
            .bind(owner)
            .bind(block.title)
            .bind(block.content)
            .bind(block.block_theme_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_block(&self, id: Uuid, changes: BlockChanges) -> Result<Option<Block>, StoreError> {
        let sql = format!(
            "UPDATE blocks SET title = COALESCE($2, title), content = COALESCE($3, content), \
             sort_order = COALESCE($4, sort_order), block_theme_id = COALESCE($5, block_theme_id), \
             updated_at = now() WHERE id = $1 AND deleted_at IS NULL RETURNING {}",
            BLOCK_COLUMNS
        );
        Ok(sqlx::query_as::<_, Block>(&sql)
            .bind(id)
            .bind(changes.title)
            .bind(changes.content)
            .bind(changes.sort_order)
            .bind(changes.block_theme_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn soft_delete_block(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE blocks SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reorder_blocks(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (index, id) in ids.iter().enumerate() {
            sqlx::query("UPDATE blocks SET sort_order = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(index as i32)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_block_theme(&self, id: Uuid, theme_id: Option<Uuid>) -> Result<Option<Block>, StoreError> {
        let sql = format!(
            "UPDATE blocks SET block_theme_id = $2, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {}",
            BLOCK_COLUMNS
        );
        Ok(sqlx::query_as::<_, Block>(&sql)
            .bind(id)
            .bind(theme_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_themes(&self, creator: Uuid, skip: i64, limit: i64) -> Result<Vec<Theme>, StoreError> {
        let sql = format!(
            "{} WHERE t.creator_id = $1 ORDER BY t.updated_at DESC OFFSET $2 LIMIT $3",
            THEME_SELECT
        );
        Ok(sqlx::query_as::<_, Theme>(&sql)
            .bind(creator)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_theme(&self, id: Uuid) -> Result<Option<Theme>, StoreError> {
        self.fetch_theme(id).await
    }

    async fn create_theme(&self, creator: Uuid, theme: NewTheme) -> Result<Theme, StoreError> {
        let id: (Uuid,) = sqlx::query_as(
            "INSERT INTO block_themes (id, title, description, creator_id) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(theme.title)
        .bind(theme.description)
        .bind(creator)
        .fetch_one(&self.pool)
        .await?;

        self.fetch_theme(id.0)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("theme {}", id.0)))
    }

    async fn update_theme(&self, id: Uuid, changes: ThemeChanges) -> Result<Option<Theme>, StoreError> {
        let result = sqlx::query(
            "UPDATE block_themes SET title = COALESCE($2, title), description = COALESCE($3, description), \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.description)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_theme(id).await
    }

    async fn delete_theme(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE blocks SET block_theme_id = NULL WHERE block_theme_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM block_themes WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_theme_blocks(&self, theme_id: Uuid, viewer: Uuid) -> Result<Vec<ThemeBlock>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            #[sqlx(flatten)]
            block: Block,
            node_title: Option<String>,
            user_name: Option<String>,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT b.id, b.node_id, b.user_id, b.title, b.content, b.block_theme_id, b.sort_order, \
             b.created_at, b.updated_at, b.deleted_at, n.title AS node_title, u.name AS user_name \
             FROM blocks b \
             JOIN nodes n ON n.id = b.node_id AND n.deleted_at IS NULL \
             LEFT JOIN users u ON u.id = b.user_id \
             WHERE b.block_theme_id = $1 AND b.deleted_at IS NULL AND (n.is_public OR n.user_id = $2) \
             ORDER BY b.updated_at DESC",
        )
        .bind(theme_id)
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ThemeBlock {
                block: r.block,
                node_title: r.node_title,
                user_name: r.user_name,
            })
            .collect())
    }

    async fn recent_activity(&self, viewer: Uuid, limit: i64) -> Result<Vec<ActivityItem>, StoreError> {
        Ok(sqlx::query_as::<_, ActivityItem>(
            "SELECT b.id AS block_id, b.title AS block_title, b.updated_at AS block_updated_at, \
             n.id AS node_id, n.title AS node_title, b.user_id, \
             COALESCE(u.name, $3) AS user_name \
             FROM blocks b \
             JOIN nodes n ON n.id = b.node_id \
             LEFT JOIN users u ON u.id = b.user_id \
             WHERE b.user_id <> $1 AND b.deleted_at IS NULL AND n.deleted_at IS NULL AND n.is_public \
             ORDER BY b.updated_at DESC LIMIT $2",
        )
        .bind(viewer)
        .bind(limit)
        .bind(UNKNOWN_USER_NAME)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn search_nodes(&self, viewer: Uuid, query: &str, limit: i64) -> Result<Vec<Node>, StoreError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE deleted_at IS NULL AND (is_public OR user_id = $1) \
             AND title ILIKE $2 ESCAPE '\\' ORDER BY updated_at DESC LIMIT $3",
            NODE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Node>(&sql)
            .bind(viewer)
            .bind(format!("%{}%", escape_like_pattern(query)))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE lower(email) = lower($1)", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, email, name, role, created_at) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.role)
            .bind(user.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| conflict_or(e, "user already exists"))
    }

    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC OFFSET $1 LIMIT $2",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_user_profile(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email) \
             WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.display_name)
            .bind(changes.email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| conflict_or(e, "email already registered"))
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let sql = format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {}", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn save_credentials(&self, credentials: Credentials) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO user_credentials (user_id, email, password_hash) VALUES ($1, lower($2), $3)")
            .bind(credentials.user_id)
            .bind(&credentials.email)
            .bind(&credentials.password_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, "email already registered"))?;
        Ok(())
    }

    async fn get_credentials(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        Ok(sqlx::query_as::<_, Credentials>(
            "SELECT user_id, email, password_hash FROM user_credentials WHERE email = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT \
             (SELECT COUNT(*) FROM users), \
             (SELECT COUNT(*) FROM nodes WHERE deleted_at IS NULL), \
             (SELECT COUNT(*) FROM blocks WHERE deleted_at IS NULL), \
             (SELECT COUNT(*) FROM block_themes)",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            users: row.0,
            nodes: row.1,
            blocks: row.2,
            themes: row.3,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_logs (action, user_id, user_email, resource_type, resource_id, details, \
             ip_address, user_agent, level, success, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(entry.action.as_str())
        .bind(entry.user_id)
        .bind(&entry.user_email)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.level.as_str())
        .bind(entry.success)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
