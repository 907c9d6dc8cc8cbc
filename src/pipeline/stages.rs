use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::operation::Requirement;
use super::PipelineContext;
use crate::audit::{AuditAction, AuditEntry, AuditLevel, AuditRecorder};
use crate::auth::{extract_bearer_token, AuthenticatedUser, Authenticator};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::rbac::RbacService;
use crate::security::rate_limit::RateLimiter;
use crate::security::sanitizer::sanitize_json;

/// Fixed execution slots. Stages always run in ascending order, whatever
/// order they were registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StageKind {
    RateLimit = 0,
    Authenticate = 1,
    Authorize = 2,
    Sanitize = 3,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> StageKind;

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ApiError>;
}

pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    api: ApiConfig,
    recorder: AuditRecorder,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>, api: ApiConfig, recorder: AuditRecorder) -> Self {
        Self { limiter, api, recorder }
    }

    /// Shared with unguarded routes, which only pass through this stage.
    pub async fn throttle(&self, route: &str, client_ip: &str, user_agent: Option<&str>) -> Result<(), ApiError> {
        if !self.api.enable_rate_limiting {
            return Ok(());
        }

        let limit = self.api.limit_for(route);
        if let Err(exceeded) = self.limiter.check(client_ip, route, limit) {
            let entry = AuditEntry::security_event(
                AuditAction::RateLimitExceeded,
                json!({
                    "route": route,
                    "limit": limit.to_string(),
                    "retry_after": exceeded.retry_after,
                }),
            )
            .client(Some(client_ip.to_string()), user_agent.map(str::to_string));
            self.recorder.record(entry).await;

            return Err(exceeded.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn kind(&self) -> StageKind {
        StageKind::RateLimit
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ApiError> {
        let result = self
            .throttle(ctx.operation.route, &ctx.meta.client_ip, ctx.meta.user_agent.as_deref())
            .await;
        // The stage already wrote its own security record
        if result.is_err() {
            ctx.audited = true;
        }
        result
    }
}

pub struct AuthenticateStage {
    authenticator: Arc<Authenticator>,
    recorder: AuditRecorder,
}

impl AuthenticateStage {
    pub fn new(authenticator: Arc<Authenticator>, recorder: AuditRecorder) -> Self {
        Self { authenticator, recorder }
    }
}

#[async_trait]
impl Stage for AuthenticateStage {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn kind(&self) -> StageKind {
        StageKind::Authenticate
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ApiError> {
        if ctx.operation.requirement == Requirement::Public {
            return Ok(());
        }

        match self.identify(ctx).await {
            Ok(user) => {
                ctx.user = Some(user);
                Ok(())
            }
            Err(error) => {
                // Written here so the record names the attempt, not a generic failure
                self.recorder.record(unauthorized_entry(ctx, &error)).await;
                ctx.audited = true;
                Err(error)
            }
        }
    }
}

impl AuthenticateStage {
    async fn identify(&self, ctx: &PipelineContext) -> Result<AuthenticatedUser, ApiError> {
        let header = ctx
            .meta
            .authorization
            .as_deref()
            .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;
        let token = extract_bearer_token(header)?;
        Ok(self.authenticator.authenticate(&token).await?)
    }
}

fn unauthorized_entry(ctx: &PipelineContext, error: &ApiError) -> AuditEntry {
    let reason = if ctx.meta.authorization.is_some() {
        "invalid_token"
    } else {
        "missing_token"
    };
    let details = json!({
        "route": ctx.operation.route,
        "reason": reason,
        "error": error.message(),
        "error_type": error.error_code(),
    });
    let level = if error.status_code() >= 500 {
        AuditLevel::Error
    } else {
        AuditLevel::Warning
    };

    AuditEntry::auth_event(AuditAction::UnauthorizedAccess, None, None, false, Some(details))
        .resource(ctx.operation.resource_type, ctx.resource_id.clone())
        .client(Some(ctx.meta.client_ip.clone()), ctx.meta.user_agent.clone())
        .failed(level)
}

pub struct AuthorizeStage {
    rbac: Arc<RbacService>,
}

impl AuthorizeStage {
    pub fn new(rbac: Arc<RbacService>) -> Self {
        Self { rbac }
    }
}

#[async_trait]
impl Stage for AuthorizeStage {
    fn name(&self) -> &'static str {
        "authorize"
    }

    fn kind(&self) -> StageKind {
        StageKind::Authorize
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ApiError> {
        let result = match ctx.operation.requirement {
            Requirement::Public | Requirement::Authenticated => return Ok(()),
            Requirement::Permission(permission) => self
                .rbac
                .check_permission(ctx.user.as_ref(), permission)
                .map(|_| ()),
            Requirement::AnyOf(permissions) => self
                .rbac
                .require_any(ctx.user.as_ref(), permissions)
                .map(|_| ()),
        };

        result.map_err(|denied| {
            if let Some(permission) = denied.denied_permission() {
                ctx.note("denied_permission", json!(permission));
            }
            ApiError::from(denied)
        })
    }
}

/// Cleans every string in the request body before the handler sees it,
/// except the operation's raw fields.
pub struct SanitizeStage;

fn sanitize_body(body: Value, raw_fields: &[&str]) -> Value {
    match body {
        Value::Object(map) if !raw_fields.is_empty() => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let value = if raw_fields.contains(&key.as_str()) {
                        value
                    } else {
                        sanitize_json(&value)
                    };
                    (key, value)
                })
                .collect(),
        ),
        other => sanitize_json(&other),
    }
}

#[async_trait]
impl Stage for SanitizeStage {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    fn kind(&self) -> StageKind {
        StageKind::Sanitize
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ApiError> {
        match ctx.payload.take() {
            None => Ok(()),
            Some(Err(rejected)) => Err(rejected),
            Some(Ok(body)) => {
                let body = sanitize_body(body, ctx.operation.raw_fields);
                if ctx.operation.requirement == Requirement::Public {
                    ctx.claimed_email = body.get("email").and_then(Value::as_str).map(str::to_lowercase);
                }
                ctx.payload = Some(Ok(body));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_fields_survive_sanitizing() {
        let body = json!({ "password": "<b>p&ss' OR '1'='1</b>", "display_name": "<script>x</script>Kai" });
        let cleaned = sanitize_body(body, &["password"]);
        assert_eq!(cleaned["password"], "<b>p&ss' OR '1'='1</b>");
        assert!(!cleaned["display_name"].as_str().unwrap().contains("<script"));
    }
}
