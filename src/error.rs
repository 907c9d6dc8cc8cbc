// HTTP API Error Types
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::rbac::AccessError;
use crate::security::rate_limit::RateLimitExceeded;
use crate::security::sanitizer::SanitizeError;
use crate::store::StoreError;

const GENERIC_FAILURE: &str = "An error occurred while processing your request";

/// HTTP-facing error. Every variant renders as
/// `{"error": {"code", "message", "type"}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    // 400 Bad Request
    ValidationFailed(String),

    // 401 Unauthorized
    AuthenticationMissing(String),

    // 403 Forbidden
    AuthorizationDenied(String),

    // 404 Not Found
    NotFound(String),

    // 429 Too Many Requests
    RateLimitExceeded { retry_after: u64 },

    // 500 Internal Server Error; the cause is logged, never returned
    UpstreamFailure,
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::ValidationFailed(_) => 400,
            ApiError::AuthenticationMissing(_) => 401,
            ApiError::AuthorizationDenied(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::RateLimitExceeded { .. } => 429,
            ApiError::UpstreamFailure => 500,
        }
    }

    /// Client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::ValidationFailed(msg)
            | ApiError::AuthenticationMissing(msg)
            | ApiError::AuthorizationDenied(msg)
            | ApiError::NotFound(msg) => msg.clone(),
            ApiError::RateLimitExceeded { retry_after } => {
                format!("Rate limit exceeded, retry in {} seconds", retry_after)
            }
            ApiError::UpstreamFailure => GENERIC_FAILURE.to_string(),
        }
    }

    /// Stable tag, used as `error_type` in audit details
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::ValidationFailed(_) => "VALIDATION_FAILED",
            ApiError::AuthenticationMissing(_) => "AUTHENTICATION_MISSING",
            ApiError::AuthorizationDenied(_) => "AUTHORIZATION_DENIED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::UpstreamFailure => "UPSTREAM_FAILURE",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::UpstreamFailure => "internal_error",
            _ => "http_error",
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.status_code(),
                "message": self.message(),
                "type": self.error_type(),
            }
        })
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::ValidationFailed(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        ApiError::AuthenticationMissing(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::AuthorizationDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthenticated => ApiError::unauthenticated("Authentication required"),
            other => ApiError::forbidden(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => ApiError::unauthenticated("Authentication required"),
            AuthError::InvalidToken(reason) => {
                tracing::info!(reason = %reason, "Rejected bearer token");
                ApiError::unauthenticated("Invalid authentication token")
            }
            AuthError::Expired => ApiError::unauthenticated("Authentication token expired"),
            AuthError::UnknownUser => ApiError::unauthenticated("User not found"),
            AuthError::InvalidCredentials => ApiError::unauthenticated("Invalid email or password"),
            AuthError::EmailTaken => ApiError::validation("Email is already registered"),
            AuthError::WeakPassword(msg) | AuthError::Rejected(msg) => ApiError::validation(msg),
            AuthError::Hashing(msg) => {
                tracing::error!(error = %msg, "Password hashing failed");
                ApiError::UpstreamFailure
            }
            AuthError::NotConfigured(what) => {
                tracing::error!(missing = what, "Identity provider not configured");
                ApiError::UpstreamFailure
            }
            AuthError::Upstream(msg) => {
                tracing::error!(error = %msg, "Identity provider failure");
                ApiError::UpstreamFailure
            }
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::not_found(msg),
            StoreError::Conflict(msg) => ApiError::validation(capitalize(&msg)),
            StoreError::Unavailable(msg) => {
                tracing::error!("Datastore unavailable: {}", msg);
                ApiError::UpstreamFailure
            }
            StoreError::Query(msg) => {
                // Don't expose internal SQL errors to clients
                tracing::error!("Datastore query error: {}", msg);
                ApiError::UpstreamFailure
            }
            StoreError::Sqlx(sqlx_err) => {
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::UpstreamFailure
            }
        }
    }
}

fn capitalize(msg: &str) -> String {
    let mut chars = msg.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<SanitizeError> for ApiError {
    fn from(err: SanitizeError) -> Self {
        ApiError::validation(err.to_string())
    }
}

impl From<RateLimitExceeded> for ApiError {
    fn from(err: RateLimitExceeded) -> Self {
        ApiError::RateLimitExceeded {
            retry_after: err.retry_after,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.to_json())).into_response();

        if let ApiError::RateLimitExceeded { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{Permission, Role};

    #[test]
    fn envelope_shape() {
        let body = ApiError::not_found("Node not found").to_json();
        assert_eq!(body["error"]["code"], 404);
        assert_eq!(body["error"]["message"], "Node not found");
        assert_eq!(body["error"]["type"], "http_error");
    }

    #[test]
    fn upstream_failures_hide_the_cause() {
        let err: ApiError = StoreError::Query("relation \"nodes\" does not exist".into()).into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_json()["error"]["message"], GENERIC_FAILURE);
        assert_eq!(err.error_type(), "internal_error");
    }

    #[test]
    fn access_errors_map_to_401_and_403() {
        assert_eq!(ApiError::from(AccessError::Unauthenticated).status_code(), 401);
        let denied = AccessError::Denied {
            permission: Permission::NodeCreate,
            role: Role::Viewer,
        };
        assert_eq!(ApiError::from(denied).status_code(), 403);
    }

    #[test]
    fn rate_limit_sets_retry_after() {
        let response = ApiError::RateLimitExceeded { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
