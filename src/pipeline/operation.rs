use crate::audit::AuditAction;
use crate::rbac::Permission;

/// What the caller must hold before the handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Anyone; only rate limiting and sanitizing apply
    Public,
    Authenticated,
    Permission(Permission),
    AnyOf(&'static [Permission]),
}

/// One guarded endpoint: its rate-limit key, audit tag and requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub route: &'static str,
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub requirement: Requirement,
    /// Top-level body fields passed through unsanitized, e.g. passwords
    pub raw_fields: &'static [&'static str],
}

const fn op(
    route: &'static str,
    action: AuditAction,
    resource_type: &'static str,
    requirement: Requirement,
) -> Operation {
    Operation {
        route,
        action,
        resource_type,
        requirement,
        raw_fields: &[],
    }
}

const fn public(
    route: &'static str,
    action: AuditAction,
    resource_type: &'static str,
    raw_fields: &'static [&'static str],
) -> Operation {
    Operation {
        raw_fields,
        ..op(route, action, resource_type, Requirement::Public)
    }
}

use AuditAction as A;
use Permission as P;
use Requirement::{AnyOf, Authenticated, Permission as Needs};

const ADMIN_AREA: &[Permission] = &[P::SystemAdmin];

pub const NODES_LIST: Operation = op("nodes.list", A::Read, "node", Needs(P::NodeRead));
pub const NODES_CREATE: Operation = op("nodes.create", A::NodeCreate, "node", Needs(P::NodeCreate));
pub const NODES_GET: Operation = op("nodes.get", A::Read, "node", Needs(P::NodeRead));
pub const NODES_UPDATE: Operation = op("nodes.update", A::NodeUpdate, "node", Needs(P::NodeUpdate));
pub const NODES_DELETE: Operation = op("nodes.delete", A::NodeDelete, "node", Needs(P::NodeDelete));
pub const NODES_BLOCKS: Operation = op("nodes.blocks", A::Read, "block", Needs(P::BlockRead));

pub const BLOCKS_CREATE: Operation = op("blocks.create", A::BlockCreate, "block", Needs(P::BlockCreate));
pub const BLOCKS_REORDER: Operation = op("blocks.reorder", A::BlockReorder, "block", Needs(P::BlockUpdate));
pub const BLOCKS_GET: Operation = op("blocks.get", A::Read, "block", Needs(P::BlockRead));
pub const BLOCKS_UPDATE: Operation = op("blocks.update", A::BlockUpdate, "block", Needs(P::BlockUpdate));
pub const BLOCKS_DELETE: Operation = op("blocks.delete", A::BlockDelete, "block", Needs(P::BlockDelete));
pub const BLOCKS_THEME: Operation = op("blocks.theme", A::BlockUpdate, "block", Needs(P::BlockUpdate));

pub const THEMES_LIST: Operation = op("themes.list", A::Read, "theme", Needs(P::ThemeRead));
pub const THEMES_CREATE: Operation = op("themes.create", A::ThemeCreate, "theme", Needs(P::ThemeCreate));
pub const THEMES_GET: Operation = op("themes.get", A::Read, "theme", Needs(P::ThemeRead));
pub const THEMES_UPDATE: Operation = op("themes.update", A::ThemeUpdate, "theme", Needs(P::ThemeUpdate));
pub const THEMES_DELETE: Operation = op("themes.delete", A::ThemeDelete, "theme", Needs(P::ThemeDelete));
pub const THEMES_BLOCKS: Operation = op("themes.blocks", A::Read, "block", Needs(P::BlockRead));

pub const ACTIVITY: Operation = op("activity", A::Read, "activity", Needs(P::NodeRead));
pub const SEARCH: Operation = op("search", A::Search, "node", Needs(P::NodeRead));

const CREDENTIALS: &[&str] = &["email", "password"];

pub const AUTH_REGISTER: Operation = public("auth.register", A::UserCreate, "auth", CREDENTIALS);
pub const AUTH_LOGIN: Operation = public("auth.login", A::Login, "auth", CREDENTIALS);
pub const AUTH_REFRESH: Operation = public("auth.refresh", A::TokenRefresh, "auth", &["refresh_token"]);
pub const AUTH_LOGOUT: Operation = op("auth.logout", A::Logout, "auth", Authenticated);
pub const AUTH_ME: Operation = op("auth.me", A::Read, "user", Authenticated);

pub const USERS_ME: Operation = op("users.me", A::Read, "user", Authenticated);
pub const USERS_UPDATE: Operation = op("users.update", A::UserUpdate, "user", Authenticated);
pub const USERS_PERMISSIONS: Operation = op("users.permissions", A::Read, "user", Authenticated);
pub const USERS_LIST: Operation = op("users.list", A::Read, "user", Needs(P::UserRead));
pub const USERS_GET: Operation = op("users.get", A::Read, "user", Needs(P::UserRead));

pub const ADMIN_OVERVIEW: Operation = op("admin.overview", A::Read, "system", AnyOf(ADMIN_AREA));
pub const ADMIN_USERS: Operation = op("admin.users", A::Read, "user", AnyOf(ADMIN_AREA));
pub const ADMIN_ROLE: Operation = op("admin.role", A::UserRoleChange, "user", Needs(P::SystemAdmin));
pub const ADMIN_PERMISSIONS: Operation = op("admin.permissions", A::Read, "user", Needs(P::SystemAdmin));
pub const ADMIN_GRANT: Operation = op("admin.grant", A::UserRoleChange, "user", Needs(P::SystemAdmin));
pub const ADMIN_REVOKE: Operation = op("admin.revoke", A::UserRoleChange, "user", Needs(P::SystemAdmin));
