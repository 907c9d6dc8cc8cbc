//! Fixed-order request pipeline.
//!
//! rate-limit → authenticate → authorize → sanitize → handle → audit.
//! Stages are sorted by `StageKind` when the pipeline is built, so
//! registration order never changes execution order. Exactly one audit
//! record is written per guarded operation.

pub mod operation;
pub mod stages;

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::audit::{AuditAction, AuditEntry, AuditLevel, AuditRecorder};
use crate::auth::{AuthenticatedUser, Authenticator};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::middleware::RequestMeta;
use crate::rbac::RbacService;
use crate::security::rate_limit::RateLimiter;
use crate::security::sanitizer::sanitize;

pub use operation::{Operation, Requirement};
pub use stages::{Stage, StageKind};

use stages::{AuthenticateStage, AuthorizeStage, RateLimitStage, SanitizeStage};

/// Request body as extracted by axum; malformed JSON is reported by the
/// sanitize stage, after the caller has been rate limited and authorized.
pub type Body = Result<Json<Value>, JsonRejection>;

pub fn body(raw: Body) -> Result<Value, ApiError> {
    raw.map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

/// State threaded through the stages of one request
pub struct PipelineContext {
    pub operation: Operation,
    pub meta: RequestMeta,
    pub user: Option<AuthenticatedUser>,
    /// Path id of the addressed resource, known before any stage runs
    pub resource_id: Option<String>,
    /// Email a public request claims to act for
    pub claimed_email: Option<String>,
    pub payload: Option<Result<Value, ApiError>>,
    /// Extra keys for the failure audit record
    pub notes: Map<String, Value>,
    /// Set when a stage has already written the record for this request
    pub audited: bool,
}

impl PipelineContext {
    pub fn new(operation: Operation, meta: RequestMeta, payload: Option<Result<Value, ApiError>>) -> Self {
        Self {
            operation,
            meta,
            user: None,
            resource_id: None,
            claimed_email: None,
            payload,
            notes: Map::new(),
            audited: false,
        }
    }

    pub fn note(&mut self, key: &str, value: Value) {
        self.notes.insert(key.to_string(), value);
    }
}

/// What a handler sees once every stage has passed
#[derive(Debug, Clone)]
pub struct Guarded {
    pub user: AuthenticatedUser,
    pub payload: Option<Value>,
}

impl Guarded {
    /// Deserialize the sanitized body
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        parse_payload(&self.payload)
    }
}

/// What a public handler sees: a sanitized body and no caller identity
#[derive(Debug, Clone)]
pub struct Anonymous {
    pub payload: Option<Value>,
}

impl Anonymous {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        parse_payload(&self.payload)
    }
}

fn parse_payload<T: DeserializeOwned>(payload: &Option<Value>) -> Result<T, ApiError> {
    let payload = payload
        .clone()
        .ok_or_else(|| ApiError::validation("Request body is required"))?;
    serde_json::from_value(payload).map_err(|e| ApiError::validation(format!("Invalid request body: {}", e)))
}

/// Handler output plus what the audit record should say about it
#[derive(Debug)]
pub struct Handled<T> {
    pub value: T,
    pub resource_id: Option<String>,
    pub details: Option<Value>,
    /// Who the record is about when the pipeline had no caller, e.g. a login
    pub actor: Option<AuthenticatedUser>,
}

impl<T> Handled<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            resource_id: None,
            details: None,
            actor: None,
        }
    }

    pub fn actor(mut self, user: AuthenticatedUser) -> Self {
        self.actor = Some(user);
        self
    }

    pub fn resource(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn changes(mut self, old_data: Option<Value>, new_data: Option<Value>) -> Self {
        let mut details = Map::new();
        if let Some(old) = old_data {
            details.insert("old_data".into(), old);
        }
        if let Some(new) = new_data {
            details.insert("new_data".into(), new);
        }
        self.details = Some(Value::Object(details));
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    throttle: Arc<RateLimitStage>,
    recorder: AuditRecorder,
}

impl Pipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        api: ApiConfig,
        authenticator: Arc<Authenticator>,
        rbac: Arc<RbacService>,
        recorder: AuditRecorder,
    ) -> Self {
        let throttle = Arc::new(RateLimitStage::new(limiter, api, recorder.clone()));

        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(SanitizeStage),
            Box::new(AuthorizeStage::new(rbac)),
            Box::new(AuthenticateStage::new(authenticator, recorder.clone())),
            Box::new(SharedStage(throttle.clone())),
        ];
        stages.sort_by_key(|stage| stage.kind());

        tracing::debug!(
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Request pipeline assembled"
        );

        Self {
            stages,
            throttle,
            recorder,
        }
    }

    pub fn stage_order(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// Rate limiting only, for public routes
    pub async fn throttle(&self, route: &str, meta: &RequestMeta) -> Result<(), ApiError> {
        self.throttle
            .throttle(route, &meta.client_ip, meta.user_agent.as_deref())
            .await
    }

    /// Run every stage, then the handler, then record the outcome.
    /// A failure anywhere is audited and returned unchanged.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &Operation,
        meta: RequestMeta,
        payload: Option<Body>,
        handler: F,
    ) -> Result<T, ApiError>
    where
        F: FnOnce(Guarded) -> Fut,
        Fut: Future<Output = Result<Handled<T>, ApiError>>,
    {
        let ctx = PipelineContext::new(*operation, meta, payload.map(body));
        self.guarded(ctx, handler).await
    }

    /// `run` for routes that address one resource by path id. Failure
    /// records carry `target` even when the handler never resolves it.
    pub async fn run_for<T, F, Fut>(
        &self,
        operation: &Operation,
        target: &str,
        meta: RequestMeta,
        payload: Option<Body>,
        handler: F,
    ) -> Result<T, ApiError>
    where
        F: FnOnce(Guarded) -> Fut,
        Fut: Future<Output = Result<Handled<T>, ApiError>>,
    {
        let mut ctx = PipelineContext::new(*operation, meta, payload.map(body));
        ctx.resource_id = Some(sanitize(target, MAX_TARGET_LENGTH));
        self.guarded(ctx, handler).await
    }

    /// Unauthenticated operations: rate limit and sanitize, then the handler.
    /// Failures are recorded as failed logins against the claimed email.
    pub async fn run_public<T, F, Fut>(
        &self,
        operation: &Operation,
        meta: RequestMeta,
        payload: Option<Body>,
        handler: F,
    ) -> Result<T, ApiError>
    where
        F: FnOnce(Anonymous) -> Fut,
        Fut: Future<Output = Result<Handled<T>, ApiError>>,
    {
        let mut ctx = PipelineContext::new(*operation, meta, payload.map(body));

        let outcome = match self.run_stages(&mut ctx).await.and_then(|()| take_payload(&mut ctx)) {
            Ok(payload) => handler(Anonymous { payload }).await,
            Err(e) => Err(e),
        };
        self.finish(&ctx, outcome).await
    }

    async fn guarded<T, F, Fut>(&self, mut ctx: PipelineContext, handler: F) -> Result<T, ApiError>
    where
        F: FnOnce(Guarded) -> Fut,
        Fut: Future<Output = Result<Handled<T>, ApiError>>,
    {
        let outcome = match self.run_stages(&mut ctx).await.and_then(|()| guard(&mut ctx)) {
            Ok(guarded) => handler(guarded).await,
            Err(e) => Err(e),
        };
        self.finish(&ctx, outcome).await
    }

    async fn finish<T>(&self, ctx: &PipelineContext, outcome: Result<Handled<T>, ApiError>) -> Result<T, ApiError> {
        match outcome {
            Ok(handled) => {
                self.recorder.record(success_entry(ctx, &handled)).await;
                Ok(handled.value)
            }
            Err(error) => {
                if !ctx.audited {
                    self.recorder.record(failure_entry(ctx, &error)).await;
                }
                Err(error)
            }
        }
    }

    async fn run_stages(&self, ctx: &mut PipelineContext) -> Result<(), ApiError> {
        for stage in &self.stages {
            if let Err(e) = stage.execute(ctx).await {
                tracing::debug!(stage = stage.name(), route = ctx.operation.route, error = %e, "Pipeline stopped");
                return Err(e);
            }
        }
        Ok(())
    }
}

const MAX_TARGET_LENGTH: usize = 64;

fn take_payload(ctx: &mut PipelineContext) -> Result<Option<Value>, ApiError> {
    match ctx.payload.take() {
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

fn guard(ctx: &mut PipelineContext) -> Result<Guarded, ApiError> {
    let user = ctx
        .user
        .clone()
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;
    let payload = take_payload(ctx)?;
    Ok(Guarded { user, payload })
}

/// Lets the boxed stage list and `throttle` share one rate-limit stage
struct SharedStage(Arc<RateLimitStage>);

#[async_trait::async_trait]
impl Stage for SharedStage {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn kind(&self) -> StageKind {
        self.0.kind()
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ApiError> {
        self.0.execute(ctx).await
    }
}

fn base_entry(ctx: &PipelineContext, resource_id: Option<String>) -> AuditEntry {
    let entry = AuditEntry::new(ctx.operation.action)
        .resource(ctx.operation.resource_type, resource_id)
        .client(Some(ctx.meta.client_ip.clone()), ctx.meta.user_agent.clone());
    match &ctx.user {
        Some(user) => entry.actor(user),
        None => entry,
    }
}

fn success_entry<T>(ctx: &PipelineContext, handled: &Handled<T>) -> AuditEntry {
    let resource_id = handled.resource_id.clone().or_else(|| ctx.resource_id.clone());
    let mut entry = base_entry(ctx, resource_id);
    if let Some(actor) = &handled.actor {
        entry = entry.actor(actor);
    }
    match &handled.details {
        Some(details) => entry.details(details.clone()),
        None => entry,
    }
}

fn failure_entry(ctx: &PipelineContext, error: &ApiError) -> AuditEntry {
    let mut details = ctx.notes.clone();
    details.insert("error".into(), Value::String(error.message()));
    details.insert("error_type".into(), Value::String(error.error_code().to_string()));

    let level = if error.status_code() >= 500 {
        AuditLevel::Error
    } else {
        AuditLevel::Warning
    };

    if ctx.operation.requirement == Requirement::Public {
        details.insert("route".into(), Value::String(ctx.operation.route.to_string()));
        return AuditEntry::auth_event(
            AuditAction::LoginFailed,
            None,
            ctx.claimed_email.clone(),
            false,
            Some(Value::Object(details)),
        )
        .client(Some(ctx.meta.client_ip.clone()), ctx.meta.user_agent.clone())
        .failed(level);
    }

    base_entry(ctx, ctx.resource_id.clone())
        .details(Value::Object(details))
        .failed(level)
}
