use std::collections::{BTreeSet, HashMap};

use super::role::{Permission, Role};

/// Static role → permission mapping. Built once when the service is constructed
/// and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PermissionTable {
    grants: HashMap<Role, BTreeSet<Permission>>,
}

impl PermissionTable {
    pub fn new() -> Self {
        use Permission::*;

        let content_admin = [
            NodeCreate, NodeUpdate, NodeDelete, NodeRead,
            BlockCreate, BlockUpdate, BlockDelete, BlockRead,
            ThemeCreate, ThemeUpdate, ThemeDelete, ThemeRead,
        ];

        let mut grants = HashMap::new();

        grants.insert(Role::SuperAdmin, Permission::ALL.iter().copied().collect());

        let mut tenant_admin: BTreeSet<Permission> = [
            TenantRead,
            UserCreate, UserUpdate, UserDelete, UserRead,
            ProjectCreate, ProjectUpdate, ProjectDelete, ProjectRead,
        ]
        .into_iter()
        .collect();
        tenant_admin.extend(content_admin);
        grants.insert(Role::TenantAdmin, tenant_admin);

        let mut project_admin: BTreeSet<Permission> = [ProjectRead].into_iter().collect();
        project_admin.extend(content_admin);
        grants.insert(Role::ProjectAdmin, project_admin);

        grants.insert(
            Role::Editor,
            [
                ProjectRead,
                NodeCreate, NodeUpdate, NodeDelete, NodeRead,
                BlockCreate, BlockUpdate, BlockDelete, BlockRead,
                ThemeCreate, ThemeUpdate, ThemeRead,
            ]
            .into_iter()
            .collect(),
        );

        grants.insert(
            Role::Viewer,
            [ProjectRead, NodeRead, BlockRead, ThemeRead].into_iter().collect(),
        );

        grants.insert(Role::Guest, [BlockRead, ThemeRead].into_iter().collect());

        Self { grants }
    }

    /// Full permission set for a role
    pub fn permissions(&self, role: Role) -> &BTreeSet<Permission> {
        // every Role variant is inserted in new()
        &self.grants[&role]
    }

    pub fn has_permission(&self, role: Role, permission: Permission) -> bool {
        self.permissions(role).contains(&permission)
    }
}

impl Default for PermissionTable {
    fn default() -> Self {
        Self::new()
    }
}
