use serde::Serialize;

use crate::cli::utils::{output, output_error};
use crate::cli::OutputFormat;
use crate::rbac::{Permission, PermissionTable, Role};

#[derive(Debug, Serialize)]
pub struct RoleSummary {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub role: Role,
    pub permission: Permission,
    pub granted: bool,
}

pub fn summaries(table: &PermissionTable, only: Option<Role>) -> Vec<RoleSummary> {
    Role::ALL
        .iter()
        .copied()
        .filter(|role| only.map_or(true, |wanted| wanted == *role))
        .map(|role| RoleSummary {
            role,
            permissions: table.permissions(role).iter().copied().collect(),
        })
        .collect()
}

pub fn list(role: Option<&str>, output_format: OutputFormat) -> anyhow::Result<()> {
    let only = match role {
        Some(name) => Some(name.parse::<Role>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let table = PermissionTable::new();

    output(output_format, &summaries(&table, only), |roles| {
        for summary in roles {
            println!("{} ({} permissions)", summary.role, summary.permissions.len());
            for permission in &summary.permissions {
                println!("  {}", permission);
            }
        }
    })
}

pub fn check(role: &str, permission: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let role: Role = role.parse().map_err(anyhow::Error::msg)?;
    let permission: Permission = permission.parse().map_err(anyhow::Error::msg)?;

    let result = CheckResult {
        role,
        permission,
        granted: PermissionTable::new().has_permission(role, permission),
    };

    if result.granted {
        output(output_format, &result, |r| println!("✓ {} has {}", r.role, r.permission))
    } else {
        output_error(
            output_format,
            &format!("{} lacks {}", role, permission),
            Some("AUTHORIZATION_DENIED"),
        )?;
        anyhow::bail!("permission denied")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_cover_every_role_or_one() {
        let table = PermissionTable::new();
        assert_eq!(summaries(&table, None).len(), Role::ALL.len());

        let admin = summaries(&table, Some(Role::SuperAdmin));
        assert_eq!(admin.len(), 1);
        assert!(admin[0].permissions.contains(&Permission::SystemAdmin));
    }

    #[test]
    fn check_rejects_unknown_tokens() {
        assert!(check("overlord", "node:read", OutputFormat::Json).is_err());
        assert!(check("viewer", "node:explode", OutputFormat::Json).is_err());
    }

    #[test]
    fn check_fails_when_denied() {
        assert!(check("super_admin", "system:admin", OutputFormat::Json).is_ok());
        assert!(check("viewer", "node:create", OutputFormat::Json).is_err());
    }
}
