use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role attached to an authenticated identity for the lifetime of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    TenantAdmin,
    ProjectAdmin,
    Editor,
    Viewer,
    Guest,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::SuperAdmin,
        Role::TenantAdmin,
        Role::ProjectAdmin,
        Role::Editor,
        Role::Viewer,
        Role::Guest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::TenantAdmin => "tenant_admin",
            Role::ProjectAdmin => "project_admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
            Role::Guest => "guest",
        }
    }

    /// Resolve a stored role column. Missing or unknown values fall back to viewer.
    pub fn resolve(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(Role::Viewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{}'", s))
    }
}

/// Capability token scoped by resource type and verb, e.g. `node:create`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "system:admin")]
    SystemAdmin,
    #[serde(rename = "system:read")]
    SystemRead,

    #[serde(rename = "tenant:create")]
    TenantCreate,
    #[serde(rename = "tenant:update")]
    TenantUpdate,
    #[serde(rename = "tenant:delete")]
    TenantDelete,
    #[serde(rename = "tenant:read")]
    TenantRead,

    #[serde(rename = "user:create")]
    UserCreate,
    #[serde(rename = "user:update")]
    UserUpdate,
    #[serde(rename = "user:delete")]
    UserDelete,
    #[serde(rename = "user:read")]
    UserRead,

    #[serde(rename = "project:create")]
    ProjectCreate,
    #[serde(rename = "project:update")]
    ProjectUpdate,
    #[serde(rename = "project:delete")]
    ProjectDelete,
    #[serde(rename = "project:read")]
    ProjectRead,

    #[serde(rename = "node:create")]
    NodeCreate,
    #[serde(rename = "node:update")]
    NodeUpdate,
    #[serde(rename = "node:delete")]
    NodeDelete,
    #[serde(rename = "node:read")]
    NodeRead,

    #[serde(rename = "block:create")]
    BlockCreate,
    #[serde(rename = "block:update")]
    BlockUpdate,
    #[serde(rename = "block:delete")]
    BlockDelete,
    #[serde(rename = "block:read")]
    BlockRead,

    #[serde(rename = "theme:create")]
    ThemeCreate,
    #[serde(rename = "theme:update")]
    ThemeUpdate,
    #[serde(rename = "theme:delete")]
    ThemeDelete,
    #[serde(rename = "theme:read")]
    ThemeRead,
}

impl Permission {
    pub const ALL: [Permission; 26] = [
        Permission::SystemAdmin,
        Permission::SystemRead,
        Permission::TenantCreate,
        Permission::TenantUpdate,
        Permission::TenantDelete,
        Permission::TenantRead,
        Permission::UserCreate,
        Permission::UserUpdate,
        Permission::UserDelete,
        Permission::UserRead,
        Permission::ProjectCreate,
        Permission::ProjectUpdate,
        Permission::ProjectDelete,
        Permission::ProjectRead,
        Permission::NodeCreate,
        Permission::NodeUpdate,
        Permission::NodeDelete,
        Permission::NodeRead,
        Permission::BlockCreate,
        Permission::BlockUpdate,
        Permission::BlockDelete,
        Permission::BlockRead,
        Permission::ThemeCreate,
        Permission::ThemeUpdate,
        Permission::ThemeDelete,
        Permission::ThemeRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::SystemAdmin => "system:admin",
            Permission::SystemRead => "system:read",
            Permission::TenantCreate => "tenant:create",
            Permission::TenantUpdate => "tenant:update",
            Permission::TenantDelete => "tenant:delete",
            Permission::TenantRead => "tenant:read",
            Permission::UserCreate => "user:create",
            Permission::UserUpdate => "user:update",
            Permission::UserDelete => "user:delete",
            Permission::UserRead => "user:read",
            Permission::ProjectCreate => "project:create",
            Permission::ProjectUpdate => "project:update",
            Permission::ProjectDelete => "project:delete",
            Permission::ProjectRead => "project:read",
            Permission::NodeCreate => "node:create",
            Permission::NodeUpdate => "node:update",
            Permission::NodeDelete => "node:delete",
            Permission::NodeRead => "node:read",
            Permission::BlockCreate => "block:create",
            Permission::BlockUpdate => "block:update",
            Permission::BlockDelete => "block:delete",
            Permission::BlockRead => "block:read",
            Permission::ThemeCreate => "theme:create",
            Permission::ThemeUpdate => "theme:update",
            Permission::ThemeDelete => "theme:delete",
            Permission::ThemeRead => "theme:read",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission '{}'", s))
    }
}
