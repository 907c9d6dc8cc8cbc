use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{message, parse_id};
use crate::audit::MULTIPLE_RESOURCES;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Body, Handled};
use crate::store::{Block, BlockChanges, EntityStore, NewBlock};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub block_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ThemeAssignment {
    pub theme_id: Option<Uuid>,
}

async fn ensure_theme_exists(store: &dyn EntityStore, theme_id: Option<Uuid>) -> Result<(), ApiError> {
    if let Some(theme_id) = theme_id {
        store
            .get_theme(theme_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Theme not found"))?;
    }
    Ok(())
}

/// POST /api/v1/charaxy/blocks - appended after the node's last block
pub async fn create_block(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<Block> {
    let store = state.store.clone();

    let block = state
        .pipeline
        .run(&operation::BLOCKS_CREATE, meta, Some(payload), |g| async move {
            let new_block: NewBlock = g.parse()?;
            if new_block.title.is_empty() {
                return Err(ApiError::validation("Block title is required"));
            }

            let node = store
                .get_node(new_block.node_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Node not found"))?;
            if !node.is_visible_to(g.user.id) {
                return Err(ApiError::forbidden("Access to this node is not allowed"));
            }
            ensure_theme_exists(store.as_ref(), new_block.block_theme_id).await?;

            let block = store.create_block(g.user.id, new_block).await?;
            tracing::info!(block_id = %block.id, node_id = %block.node_id, sort_order = block.sort_order, "Block created");
            Ok(Handled::new(block.clone())
                .resource(block.id)
                .changes(None, Some(block.snapshot())))
        })
        .await?;

    Ok(ApiResponse::created(block))
}

/// PUT /api/v1/charaxy/blocks/reorder - every listed block must belong to the caller
pub async fn reorder_blocks(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<Value> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();

    let body = state
        .pipeline
        .run(&operation::BLOCKS_REORDER, meta, Some(payload), |g| async move {
            let request: ReorderRequest = g.parse()?;
            if request.block_ids.is_empty() {
                return Err(ApiError::validation("block_ids must not be empty"));
            }

            for id in &request.block_ids {
                let block = store
                    .get_block(*id)
                    .await?
                    .ok_or_else(|| ApiError::not_found(format!("Block {} not found", id)))?;
                rbac.check_owner(&g.user, block.user_id, "block")?;
            }

            store.reorder_blocks(&request.block_ids).await?;
            Ok(Handled::new(message("Block order updated"))
                .resource(MULTIPLE_RESOURCES)
                .changes(None, Some(json!({ "block_ids": request.block_ids }))))
        })
        .await?;

    Ok(ApiResponse::success(body))
}

/// GET /api/v1/charaxy/blocks/:id - owner only
pub async fn get_block(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<Block> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let block = state
        .pipeline
        .run_for(&operation::BLOCKS_GET, &target, meta, None, |g| async move {
            let id = parse_id(&id, "block")?;
            let block = store
                .get_block(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Block not found"))?;
            rbac.check_owner(&g.user, block.user_id, "block")?;
            Ok(Handled::new(block).resource(id))
        })
        .await?;

    Ok(ApiResponse::success(block))
}

/// PUT /api/v1/charaxy/blocks/:id - owner only
pub async fn update_block(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
    payload: Body,
) -> ApiResult<Block> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let block = state
        .pipeline
        .run_for(&operation::BLOCKS_UPDATE, &target, meta, Some(payload), |g| async move {
            let id = parse_id(&id, "block")?;
            let changes: BlockChanges = g.parse()?;
            if changes.is_empty() {
                return Err(ApiError::validation("No fields to update"));
            }

            let existing = store
                .get_block(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Block not found"))?;
            rbac.check_owner(&g.user, existing.user_id, "block")?;
            ensure_theme_exists(store.as_ref(), changes.block_theme_id).await?;

            let updated = store
                .update_block(id, changes)
                .await?
                .ok_or_else(|| ApiError::not_found("Block not found"))?;
            Ok(Handled::new(updated.clone())
                .resource(id)
                .changes(Some(existing.snapshot()), Some(updated.snapshot())))
        })
        .await?;

    Ok(ApiResponse::success(block))
}

/// DELETE /api/v1/charaxy/blocks/:id - soft delete; owner only
pub async fn delete_block(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<Value> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let body = state
        .pipeline
        .run_for(&operation::BLOCKS_DELETE, &target, meta, None, |g| async move {
            let id = parse_id(&id, "block")?;
            let existing = store
                .get_block(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Block not found"))?;
            rbac.check_owner(&g.user, existing.user_id, "block")?;

            store.soft_delete_block(id).await?;
            Ok(Handled::new(message("Block deleted"))
                .resource(id)
                .changes(Some(existing.snapshot()), None))
        })
        .await?;

    Ok(ApiResponse::success(body))
}

/// PUT /api/v1/charaxy/blocks/:id/theme - attach or detach (`theme_id: null`)
pub async fn set_block_theme(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
    payload: Body,
) -> ApiResult<Block> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let block = state
        .pipeline
        .run_for(&operation::BLOCKS_THEME, &target, meta, Some(payload), |g| async move {
            let id = parse_id(&id, "block")?;
            let assignment: ThemeAssignment = g.parse()?;

            let existing = store
                .get_block(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Block not found"))?;
            rbac.check_owner(&g.user, existing.user_id, "block")?;
            ensure_theme_exists(store.as_ref(), assignment.theme_id).await?;

            let updated = store
                .set_block_theme(id, assignment.theme_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Block not found"))?;
            Ok(Handled::new(updated)
                .resource(id)
                .changes(
                    Some(json!({ "block_theme_id": existing.block_theme_id })),
                    Some(json!({ "block_theme_id": assignment.theme_id })),
                ))
        })
        .await?;

    Ok(ApiResponse::success(block))
}
