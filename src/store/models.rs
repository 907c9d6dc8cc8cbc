use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::rbac::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Node {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub node_type: String,
    pub is_public: bool,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.is_public || self.user_id == user_id
    }

    pub fn snapshot(&self) -> Value {
        serde_json::json!({ "title": self.title, "description": self.description })
    }
}

fn default_node_type() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub is_public: bool,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

impl NodeChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.node_type.is_none()
            && self.is_public.is_none()
            && self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Block {
    pub id: Uuid,
    pub node_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub block_theme_id: Option<Uuid>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Block {
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "title": self.title,
            "content": self.content,
            "block_theme_id": self.block_theme_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBlock {
    pub node_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub block_theme_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_theme_id: Option<Uuid>,
}

impl BlockChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.sort_order.is_none()
            && self.block_theme_id.is_none()
    }
}

/// Block listed under a theme, annotated with its node and author
#[derive(Debug, Clone, Serialize)]
pub struct ThemeBlock {
    #[serde(flatten)]
    pub block: Block,
    pub node_title: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Theme {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub creator_id: Uuid,
    pub block_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Theme {
    pub fn snapshot(&self) -> Value {
        serde_json::json!({ "title": self.title, "description": self.description })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTheme {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThemeChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ThemeChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }
}

/// Recent edit by another user on a public node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ActivityItem {
    pub block_id: Uuid,
    pub block_title: String,
    pub block_updated_at: DateTime<Utc>,
    pub node_id: Uuid,
    pub node_title: String,
    pub user_id: Uuid,
    pub user_name: String,
}

pub const UNKNOWN_USER_NAME: &str = "Unknown User";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// Raw role column; resolve with `Role::resolve`
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid, email: &str, role: Option<Role>) -> Self {
        Self {
            id,
            email: Some(email.to_string()),
            display_name: email.split('@').next().map(str::to_string),
            role: role.map(|r| r.as_str().to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn resolved_role(&self) -> Role {
        Role::resolve(self.role.as_deref())
    }

    pub fn snapshot(&self) -> Value {
        serde_json::json!({ "display_name": self.display_name, "email": self.email })
    }
}

/// Self-service profile edit; role changes go through the admin routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.email.is_none()
    }
}

/// Password login for locally managed accounts. `email` is stored lowercased.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Credentials {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub users: i64,
    pub nodes: i64,
    pub blocks: i64,
    pub themes: i64,
}
