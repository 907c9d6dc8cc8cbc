use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Handled};
use crate::security::sanitizer::{sanitize_parameter, ParamKind};
use crate::store::Node;
use crate::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/v1/search?q= - title search over visible nodes
pub async fn search(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<Node>> {
    let store = state.store.clone();

    let nodes = state
        .pipeline
        .run(&operation::SEARCH, meta, None, |g| async move {
            let raw = query.q.unwrap_or_default();
            let term = sanitize_parameter(&raw, ParamKind::String)?;
            if term.is_empty() {
                return Err(ApiError::validation("Search query must not be empty"));
            }
            let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

            let nodes = store.search_nodes(g.user.id, &term, limit).await?;
            let count = nodes.len();
            Ok(Handled::new(nodes).details(json!({ "query": term, "count": count })))
        })
        .await?;

    Ok(ApiResponse::success(nodes))
}
