//! Entity datastore.
//!
//! Handlers talk to an `EntityStore`; `PgStore` is the managed Postgres
//! backend and `MemoryStore` serves development and tests. Both double as
//! audit sinks.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::rbac::Role;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Visibility rules live in the store: `viewer` sees public rows and their own.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn list_nodes(&self, viewer: Uuid, skip: i64, limit: i64) -> Result<Vec<Node>, StoreError>;
    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, StoreError>;
    async fn create_node(&self, owner: Uuid, node: NewNode) -> Result<Node, StoreError>;
    async fn update_node(&self, id: Uuid, changes: NodeChanges) -> Result<Option<Node>, StoreError>;
    async fn soft_delete_node(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Live blocks of a node by `sort_order`
    async fn list_node_blocks(&self, node_id: Uuid) -> Result<Vec<Block>, StoreError>;
    /// Live block whose node is also live
    async fn get_block(&self, id: Uuid) -> Result<Option<Block>, StoreError>;
    /// Appends after the node's current last block
    async fn create_block(&self, owner: Uuid, block: NewBlock) -> Result<Block, StoreError>;
    async fn update_block(&self, id: Uuid, changes: BlockChanges) -> Result<Option<Block>, StoreError>;
    async fn soft_delete_block(&self, id: Uuid) -> Result<bool, StoreError>;
    /// `sort_order` becomes each id's position in `ids`
    async fn reorder_blocks(&self, ids: &[Uuid]) -> Result<(), StoreError>;
    async fn set_block_theme(&self, id: Uuid, theme_id: Option<Uuid>) -> Result<Option<Block>, StoreError>;

    async fn list_themes(&self, creator: Uuid, skip: i64, limit: i64) -> Result<Vec<Theme>, StoreError>;
    async fn get_theme(&self, id: Uuid) -> Result<Option<Theme>, StoreError>;
    async fn create_theme(&self, creator: Uuid, theme: NewTheme) -> Result<Theme, StoreError>;
    async fn update_theme(&self, id: Uuid, changes: ThemeChanges) -> Result<Option<Theme>, StoreError>;
    /// Hard delete; blocks using the theme are detached
    async fn delete_theme(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn list_theme_blocks(&self, theme_id: Uuid, viewer: Uuid) -> Result<Vec<ThemeBlock>, StoreError>;

    /// Other users' recent block edits on public nodes, newest first
    async fn recent_activity(&self, viewer: Uuid, limit: i64) -> Result<Vec<ActivityItem>, StoreError>;
    /// Case-insensitive substring match on visible node titles
    async fn search_nodes(&self, viewer: Uuid, query: &str, limit: i64) -> Result<Vec<Node>, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    /// Case-insensitive
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// `Conflict` when the id or email is already taken
    async fn create_user(&self, user: User) -> Result<User, StoreError>;
    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>, StoreError>;
    async fn update_user_profile(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError>;
    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError>;

    async fn save_credentials(&self, credentials: Credentials) -> Result<(), StoreError>;
    async fn get_credentials(&self, email: &str) -> Result<Option<Credentials>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
}
