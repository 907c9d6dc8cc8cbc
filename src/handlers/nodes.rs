use axum::extract::{Path, Query, State};
use serde_json::{json, Value};

use super::{message, parse_id, Pagination};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Body, Handled};
use crate::store::{Block, NewNode, Node, NodeChanges};
use crate::AppState;

/// GET /api/v1/charaxy/nodes - public nodes plus the caller's own, newest first
pub async fn list_nodes(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<Node>> {
    let store = state.store.clone();
    let (skip, limit) = page.resolve(&state.config.api);

    let nodes = state
        .pipeline
        .run(&operation::NODES_LIST, meta, None, |g| async move {
            let nodes = store.list_nodes(g.user.id, skip, limit).await?;
            let count = nodes.len();
            Ok(Handled::new(nodes).details(json!({ "count": count, "skip": skip, "limit": limit })))
        })
        .await?;

    Ok(ApiResponse::success(nodes))
}

/// POST /api/v1/charaxy/nodes
pub async fn create_node(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<Node> {
    let store = state.store.clone();

    let node = state
        .pipeline
        .run(&operation::NODES_CREATE, meta, Some(payload), |g| async move {
            let new_node: NewNode = g.parse()?;
            if new_node.title.is_empty() {
                return Err(ApiError::validation("Node title is required"));
            }

            let node = store.create_node(g.user.id, new_node).await?;
            tracing::info!(node_id = %node.id, user_id = %g.user.id, "Node created");
            Ok(Handled::new(node.clone())
                .resource(node.id)
                .changes(None, Some(node.snapshot())))
        })
        .await?;

    Ok(ApiResponse::created(node))
}

/// GET /api/v1/charaxy/nodes/:id
pub async fn get_node(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<Node> {
    let store = state.store.clone();
    let target = id.clone();

    let node = state
        .pipeline
        .run_for(&operation::NODES_GET, &target, meta, None, |g| async move {
            let id = parse_id(&id, "node")?;
            let node = store
                .get_node(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Node not found"))?;
            if !node.is_visible_to(g.user.id) {
                return Err(ApiError::forbidden("Access to this node is not allowed"));
            }
            Ok(Handled::new(node).resource(id))
        })
        .await?;

    Ok(ApiResponse::success(node))
}

/// PUT /api/v1/charaxy/nodes/:id - owner, or a system admin
pub async fn update_node(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
    payload: Body,
) -> ApiResult<Node> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let node = state
        .pipeline
        .run_for(&operation::NODES_UPDATE, &target, meta, Some(payload), |g| async move {
            let id = parse_id(&id, "node")?;
            let changes: NodeChanges = g.parse()?;
            if changes.is_empty() {
                return Err(ApiError::validation("No fields to update"));
            }

            let existing = store
                .get_node(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Node not found"))?;
            rbac.check_owner_or_admin(&g.user, existing.user_id, "node")?;

            let updated = store
                .update_node(id, changes)
                .await?
                .ok_or_else(|| ApiError::not_found("Node not found"))?;
            Ok(Handled::new(updated.clone())
                .resource(id)
                .changes(Some(existing.snapshot()), Some(updated.snapshot())))
        })
        .await?;

    Ok(ApiResponse::success(node))
}

/// DELETE /api/v1/charaxy/nodes/:id - soft delete; owner, or a system admin
pub async fn delete_node(State(state): State<AppState>, meta: RequestMeta, Path(id): Path<String>) -> ApiResult<Value> {
    let store = state.store.clone();
    let rbac = state.rbac.clone();
    let target = id.clone();

    let body = state
        .pipeline
        .run_for(&operation::NODES_DELETE, &target, meta, None, |g| async move {
            let id = parse_id(&id, "node")?;
            let existing = store
                .get_node(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Node not found"))?;
            rbac.check_owner_or_admin(&g.user, existing.user_id, "node")?;

            store.soft_delete_node(id).await?;
            tracing::info!(node_id = %id, user_id = %g.user.id, "Node deleted");
            Ok(Handled::new(message("Node deleted"))
                .resource(id)
                .changes(Some(existing.snapshot()), None))
        })
        .await?;

    Ok(ApiResponse::success(body))
}

/// GET /api/v1/charaxy/nodes/:id/blocks - blocks of a visible node by sort order
pub async fn list_node_blocks(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> ApiResult<Vec<Block>> {
    let store = state.store.clone();
    let target = id.clone();

    let blocks = state
        .pipeline
        .run_for(&operation::NODES_BLOCKS, &target, meta, None, |g| async move {
            let id = parse_id(&id, "node")?;
            let node = store
                .get_node(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Node not found"))?;
            if !node.is_visible_to(g.user.id) {
                return Err(ApiError::forbidden("Access to this node is not allowed"));
            }

            let blocks = store.list_node_blocks(id).await?;
            Ok(Handled::new(blocks).resource(id))
        })
        .await?;

    Ok(ApiResponse::success(blocks))
}
