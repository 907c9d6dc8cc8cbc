use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::security::sanitizer::{detect_injection, InjectionReport};
use crate::AppState;

/// GET /api/v1/
pub async fn root(State(state): State<AppState>, meta: RequestMeta) -> ApiResult<Value> {
    state.pipeline.throttle("root", &meta).await?;

    Ok(ApiResponse::success(json!({
        "name": "KAGRA API",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.as_str(),
        "endpoints": {
            "health": "/api/v1/health (public)",
            "nodes": "/api/v1/charaxy/nodes[/:id[/blocks]]",
            "blocks": "/api/v1/charaxy/blocks[/reorder | /:id[/theme]]",
            "themes": "/api/v1/charaxy/themes[/:id[/blocks]]",
            "activity": "/api/v1/charaxy/activity",
            "search": "/api/v1/search?q=",
            "users": "/api/v1/users/me[/permissions]",
            "admin": "/api/v1/admin[/users[/:id/role]] (system:admin)",
        }
    })))
}

/// GET /api/v1/health - 503 when the datastore does not answer
pub async fn health(State(state): State<AppState>, meta: RequestMeta) -> Result<Response, ApiError> {
    state.pipeline.throttle("health", &meta).await?;
    let now = chrono::Utc::now();

    let response = match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "environment": state.config.environment.as_str(),
                }
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "database": "unavailable",
                    }
                })),
            )
        }
    };

    Ok(response.into_response())
}

#[derive(Debug, Deserialize)]
pub struct SecurityTestQuery {
    pub input: Option<String>,
}

/// GET /api/v1/security/test?input= - development only; reports catalogue matches
pub async fn security_test(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(query): Query<SecurityTestQuery>,
) -> ApiResult<InjectionReport> {
    state.pipeline.throttle("security.test", &meta).await?;

    let input = query
        .input
        .ok_or_else(|| ApiError::validation("Query parameter 'input' is required"))?;
    let report = detect_injection(&input);
    if report.is_suspicious {
        tracing::warn!(risk = ?report.risk_level, patterns = report.detected_patterns.len(), "Injection attempt matched");
    }

    Ok(ApiResponse::success(report))
}
