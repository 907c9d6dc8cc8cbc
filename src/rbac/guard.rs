use std::collections::BTreeSet;

use uuid::Uuid;

use super::role::{Permission, Role};
use super::table::PermissionTable;
use crate::auth::AuthenticatedUser;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Permission denied: {permission} required")]
    Denied { permission: Permission, role: Role },

    #[error("Permission denied: one of {required:?} required")]
    DeniedAny { required: Vec<Permission>, role: Role },

    #[error("Only the owner can modify this {resource}")]
    NotOwner { resource: &'static str },
}

impl AccessError {
    /// Permission token to surface in audit details, when there is one
    pub fn denied_permission(&self) -> Option<String> {
        match self {
            AccessError::Denied { permission, .. } => Some(permission.to_string()),
            AccessError::DeniedAny { required, .. } => Some(
                required
                    .iter()
                    .map(Permission::as_str)
                    .collect::<Vec<_>>()
                    .join("|"),
            ),
            _ => None,
        }
    }
}

/// Role-based guard over the static permission table.
///
/// Constructed once at startup and shared through `AppState`; the identity is
/// always passed in explicitly by the caller.
#[derive(Debug, Clone, Default)]
pub struct RbacService {
    table: PermissionTable,
}

impl RbacService {
    pub fn new() -> Self {
        Self {
            table: PermissionTable::new(),
        }
    }

    pub fn has_permission(&self, role: Role, permission: Permission) -> bool {
        self.table.has_permission(role, permission)
    }

    pub fn permissions_for(&self, role: Role) -> &BTreeSet<Permission> {
        self.table.permissions(role)
    }

    /// Resolve the caller's role and require `permission`.
    pub fn check_permission<'a>(
        &self,
        user: Option<&'a AuthenticatedUser>,
        permission: Permission,
    ) -> Result<&'a AuthenticatedUser, AccessError> {
        let user = user.ok_or(AccessError::Unauthenticated)?;

        if self.has_permission(user.role, permission) {
            return Ok(user);
        }

        let granted: Vec<&str> = self
            .permissions_for(user.role)
            .iter()
            .map(Permission::as_str)
            .collect();
        tracing::warn!(
            user_id = %user.id,
            role = %user.role,
            permission = %permission,
            granted = ?granted,
            "Permission denied"
        );

        Err(AccessError::Denied {
            permission,
            role: user.role,
        })
    }

    /// Require at least one of `permissions`.
    pub fn require_any<'a>(
        &self,
        user: Option<&'a AuthenticatedUser>,
        permissions: &[Permission],
    ) -> Result<&'a AuthenticatedUser, AccessError> {
        let user = user.ok_or(AccessError::Unauthenticated)?;

        if permissions.iter().any(|p| self.has_permission(user.role, *p)) {
            return Ok(user);
        }

        tracing::warn!(
            user_id = %user.id,
            role = %user.role,
            required = ?permissions,
            "Permission denied for composite requirement"
        );

        Err(AccessError::DeniedAny {
            required: permissions.to_vec(),
            role: user.role,
        })
    }

    /// Node mutations: owner, or anyone holding `system:admin`.
    pub fn check_owner_or_admin(
        &self,
        user: &AuthenticatedUser,
        owner_id: Uuid,
        resource: &'static str,
    ) -> Result<(), AccessError> {
        if user.id == owner_id || self.has_permission(user.role, Permission::SystemAdmin) {
            return Ok(());
        }

        tracing::warn!(user_id = %user.id, owner_id = %owner_id, resource, "Ownership check failed");
        Err(AccessError::NotOwner { resource })
    }

    /// Block and theme mutations: the owner only.
    pub fn check_owner(
        &self,
        user: &AuthenticatedUser,
        owner_id: Uuid,
        resource: &'static str,
    ) -> Result<(), AccessError> {
        if user.id == owner_id {
            return Ok(());
        }

        tracing::warn!(user_id = %user.id, owner_id = %owner_id, resource, "Ownership check failed");
        Err(AccessError::NotOwner { resource })
    }
}
