use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{parse_id, Pagination};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Body, Handled};
use crate::rbac::{Permission, RbacService, Role};
use crate::store::{StoreStats, User};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Overview {
    pub environment: &'static str,
    pub version: &'static str,
    pub stats: StoreStats,
    pub rate_limiter_keys: u64,
    pub rate_limiter_capacity: u64,
}

#[derive(Debug, Serialize)]
pub struct AdminUser {
    #[serde(flatten)]
    pub user: User,
    pub resolved_role: Role,
    pub is_system_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: String,
}

/// GET /api/v1/admin
pub async fn overview(State(state): State<AppState>, meta: RequestMeta) -> ApiResult<Overview> {
    let store = state.store.clone();
    let limiter = state.limiter.clone();
    let environment = state.config.environment.as_str();

    let overview = state
        .pipeline
        .run(&operation::ADMIN_OVERVIEW, meta, None, |_| async move {
            let stats = store.stats().await?;
            Ok(Handled::new(Overview {
                environment,
                version: env!("CARGO_PKG_VERSION"),
                stats,
                rate_limiter_keys: limiter.tracked_keys(),
                rate_limiter_capacity: limiter.max_keys(),
            }))
        })
        .await?;

    Ok(ApiResponse::success(overview))
}

/// GET /api/v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<AdminUser>> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let (skip, limit) = page.resolve(&state.config.api);

    let users = state
        .pipeline
        .run(&operation::ADMIN_USERS, meta, None, |_| async move {
            let users: Vec<AdminUser> = store
                .list_users(skip, limit)
                .await?
                .into_iter()
                .map(|user| {
                    let role = user.resolved_role();
                    AdminUser {
                        user,
                        resolved_role: role,
                        is_system_admin: rbac.has_permission(role, Permission::SystemAdmin),
                    }
                })
                .collect();
            let count = users.len();
            Ok(Handled::new(users).details(json!({ "count": count })))
        })
        .await?;

    Ok(ApiResponse::success(users))
}

/// PUT /api/v1/admin/users/:id/role - admins cannot change their own role
pub async fn change_role(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
    payload: Body,
) -> ApiResult<User> {
    let store = state.store.clone();
    let target = id.clone();

    let user = state
        .pipeline
        .run_for(&operation::ADMIN_ROLE, &target, meta, Some(payload), |g| async move {
            let id = parse_id(&id, "user")?;
            let change: RoleChange = g.parse()?;
            let role: Role = change
                .role
                .parse()
                .map_err(|_| ApiError::validation(format!("Unknown role: {}", change.role)))?;

            if id == g.user.id {
                return Err(ApiError::validation("Cannot change your own role"));
            }

            let existing = store
                .get_user(id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;
            let updated = store
                .set_user_role(id, role)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;

            tracing::info!(target_user = %id, admin = %g.user.id, role = %role, "User role changed");
            Ok(Handled::new(updated).resource(id).changes(
                Some(json!({ "role": existing.resolved_role() })),
                Some(json!({ "role": role })),
            ))
        })
        .await?;

    Ok(ApiResponse::success(user))
}

#[derive(Debug, Serialize)]
pub struct SystemAccess {
    pub user_id: Uuid,
    pub role: Role,
    pub is_system_admin: bool,
    pub permissions: Value,
}

impl SystemAccess {
    fn of(user: &User, rbac: &RbacService) -> Self {
        let role = user.resolved_role();
        let is_system_admin = rbac.has_permission(role, Permission::SystemAdmin);
        Self {
            user_id: user.id,
            role,
            is_system_admin,
            permissions: json!({ "system_admin": is_system_admin }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminChange {
    pub message: &'static str,
    #[serde(flatten)]
    pub access: SystemAccess,
}

/// GET /api/v1/admin/system/users/:id/permissions
pub async fn user_permissions(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> ApiResult<SystemAccess> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let access = state
        .pipeline
        .run_for(&operation::ADMIN_PERMISSIONS, &target, meta, None, |_| async move {
            let id = parse_id(&id, "user")?;
            let user = store
                .get_user(id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;
            Ok(Handled::new(SystemAccess::of(&user, &rbac)).resource(id))
        })
        .await?;

    Ok(ApiResponse::success(access))
}

/// POST /api/v1/admin/system/users/:id/admin - grants the super_admin role
pub async fn grant_admin(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<AdminChange> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let change = state
        .pipeline
        .run_for(&operation::ADMIN_GRANT, &target, meta, None, |g| async move {
            let id = parse_id(&id, "user")?;
            let existing = store
                .get_user(id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;

            let before = SystemAccess::of(&existing, &rbac);
            if before.is_system_admin {
                return Ok(Handled::new(AdminChange {
                    message: "User is already a system admin",
                    access: before,
                })
                .resource(id)
                .details(json!({ "unchanged": true })));
            }

            let updated = store
                .set_user_role(id, Role::SuperAdmin)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;
            tracing::warn!(target_user = %id, admin = %g.user.id, "System admin granted");

            Ok(Handled::new(AdminChange {
                message: "System admin granted",
                access: SystemAccess::of(&updated, &rbac),
            })
            .resource(id)
            .changes(
                Some(json!({ "role": before.role })),
                Some(json!({ "role": Role::SuperAdmin })),
            ))
        })
        .await?;

    Ok(ApiResponse::success(change))
}

/// DELETE /api/v1/admin/system/users/:id/admin - demotes to viewer; never yourself
pub async fn revoke_admin(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<AdminChange> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let change = state
        .pipeline
        .run_for(&operation::ADMIN_REVOKE, &target, meta, None, |g| async move {
            let id = parse_id(&id, "user")?;
            if id == g.user.id {
                return Err(ApiError::validation("Cannot revoke your own admin access"));
            }

            let existing = store
                .get_user(id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;

            let before = SystemAccess::of(&existing, &rbac);
            if !before.is_system_admin {
                return Ok(Handled::new(AdminChange {
                    message: "User is not a system admin",
                    access: before,
                })
                .resource(id)
                .details(json!({ "unchanged": true })));
            }

            let updated = store
                .set_user_role(id, Role::Viewer)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;
            tracing::warn!(target_user = %id, admin = %g.user.id, "System admin revoked");

            Ok(Handled::new(AdminChange {
                message: "System admin revoked",
                access: SystemAccess::of(&updated, &rbac),
            })
            .resource(id)
            .changes(
                Some(json!({ "role": before.role })),
                Some(json!({ "role": Role::Viewer })),
            ))
        })
        .await?;

    Ok(ApiResponse::success(change))
}
