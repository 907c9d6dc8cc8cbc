use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::*;
use super::{EntityStore, StoreError};
use crate::audit::{AuditEntry, AuditSink};
use crate::rbac::Role;

#[derive(Default)]
struct Tables {
    nodes: HashMap<Uuid, Node>,
    blocks: HashMap<Uuid, Block>,
    themes: HashMap<Uuid, Theme>,
    users: HashMap<Uuid, User>,
    credentials: HashMap<String, Credentials>,
    audit_logs: Vec<AuditEntry>,
}

impl Tables {
    fn live_node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.get(&id).filter(|n| n.deleted_at.is_none())
    }

    fn live_block(&self, id: Uuid) -> Option<&Block> {
        self.blocks
            .get(&id)
            .filter(|b| b.deleted_at.is_none() && self.live_node(b.node_id).is_some())
    }

    fn email_owner(&self, email: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
    }

    fn with_block_count(&self, theme: &Theme) -> Theme {
        let count = self
            .blocks
            .values()
            .filter(|b| b.deleted_at.is_none() && b.block_theme_id == Some(theme.id))
            .count();
        Theme {
            block_count: count as i64,
            ..theme.clone()
        }
    }

    fn display_name(&self, user_id: Uuid) -> Option<String> {
        self.users.get(&user_id).and_then(|u| u.display_name.clone())
    }
}

/// In-process datastore for development and tests
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users are provisioned by the identity provider; this stands in for that.
    pub async fn insert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.tables.read().await.audit_logs.clone()
    }
}

fn page<T>(rows: Vec<T>, skip: i64, limit: i64) -> Vec<T> {
    rows.into_iter()
        .skip(skip.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn list_nodes(&self, viewer: Uuid, skip: i64, limit: i64) -> Result<Vec<Node>, StoreError> {
        let tables = self.tables.read().await;
        let mut nodes: Vec<Node> = tables
            .nodes
            .values()
            .filter(|n| n.deleted_at.is_none() && n.is_visible_to(viewer))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(nodes, skip, limit))
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, StoreError> {
        Ok(self.tables.read().await.live_node(id).cloned())
    }

    async fn create_node(&self, owner: Uuid, node: NewNode) -> Result<Node, StoreError> {
        let now = Utc::now();
        let node = Node {
            id: Uuid::new_v4(),
            title: node.title,
            description: node.description,
            node_type: node.node_type,
            is_public: node.is_public,
            user_id: owner,
            parent_id: node.parent_id,
            sort_order: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.tables.write().await.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn update_node(&self, id: Uuid, changes: NodeChanges) -> Result<Option<Node>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(node) = tables.nodes.get_mut(&id).filter(|n| n.deleted_at.is_none()) else {
            return Ok(None);
        };

        if let Some(title) = changes.title {
            node.title = title;
        }
        if let Some(description) = changes.description {
            node.description = Some(description);
        }
        if let Some(node_type) = changes.node_type {
            node.node_type = node_type;
        }
        if let Some(is_public) = changes.is_public {
            node.is_public = is_public;
        }
        if let Some(parent_id) = changes.parent_id {
            node.parent_id = Some(parent_id);
        }
        node.updated_at = Utc::now();

        Ok(Some(node.clone()))
    }

    async fn soft_delete_node(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.nodes.get_mut(&id).filter(|n| n.deleted_at.is_none()) {
            Some(node) => {
                node.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_node_blocks(&self, node_id: Uuid) -> Result<Vec<Block>, StoreError> {
        let tables = self.tables.read().await;
        let mut blocks: Vec<Block> = tables
            .blocks
            .values()
            .filter(|b| b.deleted_at.is_none() && b.node_id == node_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| (b.sort_order, b.created_at));
        Ok(blocks)
    }

    async fn get_block(&self, id: Uuid) -> Result<Option<Block>, StoreError> {
        Ok(self.tables.read().await.live_block(id).cloned())
    }

    async fn create_block(&self, owner: Uuid, block: NewBlock) -> Result<Block, StoreError> {
        let mut tables = self.tables.write().await;
        let sort_order = tables
            .blocks
            .values()
            .filter(|b| b.deleted_at.is_none() && b.node_id == block.node_id)
            .map(|b| b.sort_order)
            .max()
            .map_or(0, |max| max + 1);

        let now = Utc::now();
        let block = Block {
            id: Uuid::new_v4(),
            node_id: block.node_id,
            user_id: owner,
            title: block.title,
            content: block.content,
            block_theme_id: block.block_theme_id,
            sort_order,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    async fn update_block(&self, id: Uuid, changes: BlockChanges) -> Result<Option<Block>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(block) = tables.blocks.get_mut(&id).filter(|b| b.deleted_at.is_none()) else {
            return Ok(None);
        };

        if let Some(title) = changes.title {
            block.title = title;
        }
        if let Some(content) = changes.content {
            block.content = Some(content);
        }
        if let Some(sort_order) = changes.sort_order {
            block.sort_order = sort_order;
        }
        if let Some(theme_id) = changes.block_theme_id {
            block.block_theme_id = Some(theme_id);
        }
        block.updated_at = Utc::now();

        Ok(Some(block.clone()))
    }

    async fn soft_delete_block(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.blocks.get_mut(&id).filter(|b| b.deleted_at.is_none()) {
            Some(block) => {
                block.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reorder_blocks(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        for (index, id) in ids.iter().enumerate() {
            if let Some(block) = tables.blocks.get_mut(id) {
                block.sort_order = index as i32;
                block.updated_at = now;
            }
        }
        Ok(())
    }

    async fn set_block_theme(&self, id: Uuid, theme_id: Option<Uuid>) -> Result<Option<Block>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(block) = tables.blocks.get_mut(&id).filter(|b| b.deleted_at.is_none()) else {
            return Ok(None);
        };
        block.block_theme_id = theme_id;
        block.updated_at = Utc::now();
        Ok(Some(block.clone()))
    }

    async fn list_themes(&self, creator: Uuid, skip: i64, limit: i64) -> Result<Vec<Theme>, StoreError> {
        let tables = self.tables.read().await;
        let mut themes: Vec<Theme> = tables
            .themes
            .values()
            .filter(|t| t.creator_id == creator)
            .map(|t| tables.with_block_count(t))
            .collect();
        themes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(themes, skip, limit))
    }

    async fn get_theme(&self, id: Uuid) -> Result<Option<Theme>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.themes.get(&id).map(|t| tables.with_block_count(t)))
    }

    async fn create_theme(&self, creator: Uuid, theme: NewTheme) -> Result<Theme, StoreError> {
        let now = Utc::now();
        let theme = Theme {
            id: Uuid::new_v4(),
            title: theme.title,
            description: theme.description,
            creator_id: creator,
            block_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.themes.insert(theme.id, theme.clone());
        Ok(theme)
    }

    async fn update_theme(&self, id: Uuid, changes: ThemeChanges) -> Result<Option<Theme>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(theme) = tables.themes.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(title) = changes.title {
            theme.title = title;
        }
        if let Some(description) = changes.description {
            theme.description = Some(description);
        }
        theme.updated_at = Utc::now();

        let theme = theme.clone();
        Ok(Some(tables.with_block_count(&theme)))
    }

    async fn delete_theme(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.themes.remove(&id).is_none() {
            return Ok(false);
        }
        for block in tables.blocks.values_mut() {
            if block.block_theme_id == Some(id) {
                block.block_theme_id = None;
            }
        }
        Ok(true)
    }

    async fn list_theme_blocks(&self, theme_id: Uuid, viewer: Uuid) -> Result<Vec<ThemeBlock>, StoreError> {
        let tables = self.tables.read().await;
        let mut blocks: Vec<ThemeBlock> = tables
            .blocks
            .values()
            .filter(|b| b.deleted_at.is_none() && b.block_theme_id == Some(theme_id))
            .filter_map(|b| {
                let node = tables.live_node(b.node_id)?;
                node.is_visible_to(viewer).then(|| ThemeBlock {
                    block: b.clone(),
                    node_title: Some(node.title.clone()),
                    user_name: tables.display_name(b.user_id),
                })
            })
            .collect();
        blocks.sort_by(|a, b| b.block.updated_at.cmp(&a.block.updated_at));
        Ok(blocks)
    }

    async fn recent_activity(&self, viewer: Uuid, limit: i64) -> Result<Vec<ActivityItem>, StoreError> {
        let tables = self.tables.read().await;
        let mut items: Vec<ActivityItem> = tables
            .blocks
            .values()
            .filter(|b| b.deleted_at.is_none() && b.user_id != viewer)
            .filter_map(|b| {
                let node = tables.live_node(b.node_id).filter(|n| n.is_public)?;
                Some(ActivityItem {
                    block_id: b.id,
                    block_title: b.title.clone(),
                    block_updated_at: b.updated_at,
                    node_id: node.id,
                    node_title: node.title.clone(),
                    user_id: b.user_id,
                    user_name: tables
                        .display_name(b.user_id)
                        .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
                })
            })
            .collect();
        items.sort_by(|a, b| b.block_updated_at.cmp(&a.block_updated_at));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn search_nodes(&self, viewer: Uuid, query: &str, limit: i64) -> Result<Vec<Node>, StoreError> {
        let needle = query.to_lowercase();
        let tables = self.tables.read().await;
        let mut nodes: Vec<Node> = tables
            .nodes
            .values()
            .filter(|n| n.deleted_at.is_none() && n.is_visible_to(viewer))
            .filter(|n| n.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        nodes.truncate(limit.max(0) as usize);
        Ok(nodes)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.email_owner(email).cloned())
    }

    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {} already exists", user.id)));
        }
        if let Some(email) = user.email.as_deref() {
            if tables.email_owner(email).is_some() {
                return Err(StoreError::Conflict("email already registered".into()));
            }
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(users, skip, limit))
    }

    async fn update_user_profile(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(email) = changes.email.as_deref() {
            if tables.email_owner(email).is_some_and(|owner| owner.id != id) {
                return Err(StoreError::Conflict("email already registered".into()));
            }
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(display_name) = changes.display_name {
            user.display_name = Some(display_name);
        }
        if let Some(email) = changes.email {
            user.email = Some(email);
        }
        Ok(Some(user.clone()))
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.users.get_mut(&id).map(|user| {
            user.role = Some(role.as_str().to_string());
            user.clone()
        }))
    }

    async fn save_credentials(&self, credentials: Credentials) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let key = credentials.email.to_lowercase();
        if tables.credentials.contains_key(&key) {
            return Err(StoreError::Conflict("email already registered".into()));
        }
        tables.credentials.insert(key, credentials);
        Ok(())
    }

    async fn get_credentials(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        Ok(self.tables.read().await.credentials.get(&email.to_lowercase()).cloned())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let tables = self.tables.read().await;
        Ok(StoreStats {
            users: tables.users.len() as i64,
            nodes: tables.nodes.values().filter(|n| n.deleted_at.is_none()).count() as i64,
            blocks: tables.blocks.values().filter(|b| b.deleted_at.is_none()).count() as i64,
            themes: tables.themes.len() as i64,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.tables.write().await.audit_logs.push(entry.clone());
        Ok(())
    }
}
