use axum::extract::State;
use serde_json::json;

use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Handled};
use crate::store::ActivityItem;
use crate::AppState;

const FEED_LIMIT: i64 = 50;

/// GET /api/v1/charaxy/activity - other users' recent edits on public nodes
pub async fn recent_activity(State(state): State<AppState>, meta: RequestMeta) -> ApiResult<Vec<ActivityItem>> {
    let store = state.store.clone();

    let items = state
        .pipeline
        .run(&operation::ACTIVITY, meta, None, |g| async move {
            let items = store.recent_activity(g.user.id, FEED_LIMIT).await?;
            let count = items.len();
            Ok(Handled::new(items).details(json!({ "count": count })))
        })
        .await?;

    Ok(ApiResponse::success(items))
}
