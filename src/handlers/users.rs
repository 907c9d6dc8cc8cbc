use axum::extract::{Path, Query, State};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{parse_id, Pagination};
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Body, Handled};
use crate::rbac::{Permission, Role};
use crate::security::sanitizer::validate_email;
use crate::store::{EntityStore, User, UserChanges};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Role,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.resolved_role(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionSet {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

/// Profile of the authenticated caller; the email falls back to the token's
pub async fn load_profile(store: &dyn EntityStore, user: &AuthenticatedUser) -> Result<Profile, ApiError> {
    let display_name = store.get_user(user.id).await?.and_then(|u| u.display_name);
    Ok(Profile {
        id: user.id,
        email: user.email.clone(),
        display_name,
        role: user.role,
    })
}

/// GET /api/v1/users/me
pub async fn me(State(state): State<AppState>, meta: RequestMeta) -> ApiResult<Profile> {
    let store = state.store.clone();

    let profile = state
        .pipeline
        .run(&operation::USERS_ME, meta, None, |g| async move {
            let profile = load_profile(store.as_ref(), &g.user).await?;
            Ok(Handled::new(profile).resource(g.user.id))
        })
        .await?;

    Ok(ApiResponse::success(profile))
}

/// PUT /api/v1/users/me - display name and email only
pub async fn update_me(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<Profile> {
    let store = state.store.clone();

    let profile = state
        .pipeline
        .run(&operation::USERS_UPDATE, meta, Some(payload), |g| async move {
            let mut changes: UserChanges = g.parse()?;
            if changes.is_empty() {
                return Err(ApiError::validation("No fields to update"));
            }
            if let Some(email) = changes.email.take() {
                let email = email.trim().to_lowercase();
                if !validate_email(&email) {
                    return Err(ApiError::validation("Invalid email address"));
                }
                changes.email = Some(email);
            }

            let existing = store
                .get_user(g.user.id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;
            let updated = store
                .update_user_profile(g.user.id, changes)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;

            Ok(Handled::new(Profile::from(&updated))
                .resource(g.user.id)
                .changes(Some(existing.snapshot()), Some(updated.snapshot())))
        })
        .await?;

    Ok(ApiResponse::success(profile))
}

/// GET /api/v1/users/me/permissions - the caller's resolved permission set
pub async fn my_permissions(State(state): State<AppState>, meta: RequestMeta) -> ApiResult<PermissionSet> {
    let rbac = state.rbac.clone();

    let set = state
        .pipeline
        .run(&operation::USERS_PERMISSIONS, meta, None, |g| async move {
            let permissions = rbac.permissions_for(g.user.role).iter().copied().collect();
            Ok(Handled::new(PermissionSet {
                role: g.user.role,
                permissions,
            })
            .resource(g.user.id))
        })
        .await?;

    Ok(ApiResponse::success(set))
}

/// GET /api/v1/users - requires `user:read`
pub async fn list_users(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<Profile>> {
    let store = state.store.clone();
    let (skip, limit) = page.resolve(&state.config.api);

    let users = state
        .pipeline
        .run(&operation::USERS_LIST, meta, None, |_| async move {
            let users: Vec<Profile> = store.list_users(skip, limit).await?.iter().map(Profile::from).collect();
            let count = users.len();
            Ok(Handled::new(users).details(json!({ "count": count, "skip": skip, "limit": limit })))
        })
        .await?;

    Ok(ApiResponse::success(users))
}

/// GET /api/v1/users/:id - requires `user:read`
pub async fn get_user(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<Profile> {
    let store = state.store.clone();
    let target = id.clone();

    let profile = state
        .pipeline
        .run_for(&operation::USERS_GET, &target, meta, None, |_| async move {
            let id = parse_id(&id, "user")?;
            let user = store
                .get_user(id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;
            Ok(Handled::new(Profile::from(&user)).resource(id))
        })
        .await?;

    Ok(ApiResponse::success(profile))
}
