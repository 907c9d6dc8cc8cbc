use axum::extract::{Path, Query, State};
use serde_json::{json, Value};

use super::{message, parse_id, Pagination};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Body, Handled};
use crate::store::{NewTheme, Theme, ThemeBlock, ThemeChanges};
use crate::AppState;

/// GET /api/v1/charaxy/themes - the caller's themes with live block counts
pub async fn list_themes(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<Theme>> {
    let store = state.store.clone();
    let (skip, limit) = page.resolve(&state.config.api);

    let themes = state
        .pipeline
        .run(&operation::THEMES_LIST, meta, None, |g| async move {
            let themes = store.list_themes(g.user.id, skip, limit).await?;
            let count = themes.len();
            Ok(Handled::new(themes).details(json!({ "count": count })))
        })
        .await?;

    Ok(ApiResponse::success(themes))
}

/// POST /api/v1/charaxy/themes
pub async fn create_theme(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<Theme> {
    let store = state.store.clone();

    let theme = state
        .pipeline
        .run(&operation::THEMES_CREATE, meta, Some(payload), |g| async move {
            let new_theme: NewTheme = g.parse()?;
            if new_theme.title.is_empty() {
                return Err(ApiError::validation("Theme title is required"));
            }

            let theme = store.create_theme(g.user.id, new_theme).await?;
            Ok(Handled::new(theme.clone())
                .resource(theme.id)
                .changes(None, Some(theme.snapshot())))
        })
        .await?;

    Ok(ApiResponse::created(theme))
}

/// GET /api/v1/charaxy/themes/:id - creator only
pub async fn get_theme(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<Theme> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let theme = state
        .pipeline
        .run_for(&operation::THEMES_GET, &target, meta, None, |g| async move {
            let id = parse_id(&id, "theme")?;
            let theme = store
                .get_theme(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Theme not found"))?;
            rbac.check_owner(&g.user, theme.creator_id, "theme")?;
            Ok(Handled::new(theme).resource(id))
        })
        .await?;

    Ok(ApiResponse::success(theme))
}

/// PUT /api/v1/charaxy/themes/:id - creator only
pub async fn update_theme(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
    payload: Body,
) -> ApiResult<Theme> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let theme = state
        .pipeline
        .run_for(&operation::THEMES_UPDATE, &target, meta, Some(payload), |g| async move {
            let id = parse_id(&id, "theme")?;
            let changes: ThemeChanges = g.parse()?;
            if changes.is_empty() {
                return Err(ApiError::validation("No fields to update"));
            }

            let existing = store
                .get_theme(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Theme not found"))?;
            rbac.check_owner(&g.user, existing.creator_id, "theme")?;

            let updated = store
                .update_theme(id, changes)
                .await?
                .ok_or_else(|| ApiError::not_found("Theme not found"))?;
            Ok(Handled::new(updated.clone())
                .resource(id)
                .changes(Some(existing.snapshot()), Some(updated.snapshot())))
        })
        .await?;

    Ok(ApiResponse::success(theme))
}

/// DELETE /api/v1/charaxy/themes/:id - blocks using the theme are detached
pub async fn delete_theme(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<Value> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let body = state
        .pipeline
        .run_for(&operation::THEMES_DELETE, &target, meta, None, |g| async move {
            let id = parse_id(&id, "theme")?;
            let existing = store
                .get_theme(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Theme not found"))?;
            rbac.check_owner(&g.user, existing.creator_id, "theme")?;

            store.delete_theme(id).await?;
            Ok(Handled::new(message("Theme deleted"))
                .resource(id)
                .changes(Some(existing.snapshot()), None))
        })
        .await?;

    Ok(ApiResponse::success(body))
}

/// GET /api/v1/charaxy/themes/:id/blocks - blocks on nodes the caller can see
pub async fn list_theme_blocks(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> ApiResult<Vec<ThemeBlock>> {
    let store = state.store.clone();
    let target = id.clone();

    let blocks = state
        .pipeline
        .run_for(&operation::THEMES_BLOCKS, &target, meta, None, |g| async move {
            let id = parse_id(&id, "theme")?;
            store
                .get_theme(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Theme not found"))?;

            let blocks = store.list_theme_blocks(id, g.user.id).await?;
            Ok(Handled::new(blocks).resource(id))
        })
        .await?;

    Ok(ApiResponse::success(blocks))
}
