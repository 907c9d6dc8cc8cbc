pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod rbac;
pub mod security;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::audit::{AuditRecorder, AuditSink};
use crate::auth::{AccountProvider, AuthError, Authenticator, ProviderChain};
use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::rbac::RbacService;
use crate::security::{security_headers_middleware, RateLimiter};
use crate::store::EntityStore;

/// Shared services handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub rbac: Arc<RbacService>,
    pub limiter: Arc<RateLimiter>,
    pub recorder: AuditRecorder,
    pub store: Arc<dyn EntityStore>,
    pub authenticator: Arc<Authenticator>,
    pub accounts: Arc<dyn AccountProvider>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Wires providers, limiter, recorder and pipeline around one datastore.
    ///
    /// With audit logging disabled the recorder still writes to the log, but
    /// nothing is persisted through `sink`.
    pub fn build(
        config: AppConfig,
        store: Arc<dyn EntityStore>,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self, AuthError> {
        let providers = ProviderChain::from_config(&config)?;
        let token_lifetime = Duration::from_secs(config.security.jwt_expiry_hours.max(1) * 3_600);
        let authenticator =
            Arc::new(Authenticator::new(providers, store.clone()).with_revocation_window(token_lifetime));
        let accounts = auth::accounts::from_config(&config, store.clone())?;
        let rbac = Arc::new(RbacService::new());
        let limiter = Arc::new(RateLimiter::from_config(&config.api));
        let recorder = if config.security.enable_audit_logging {
            AuditRecorder::new(sink)
        } else {
            AuditRecorder::log_only()
        };

        let pipeline = Arc::new(Pipeline::new(
            limiter.clone(),
            config.api.clone(),
            authenticator.clone(),
            rbac.clone(),
            recorder.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            rbac,
            limiter,
            recorder,
            store,
            authenticator,
            accounts,
            pipeline,
        })
    }
}

/// Full HTTP surface under `/api/v1`.
pub fn build_router(state: AppState) -> Router {
    let mut api = Router::new()
        .merge(system_routes())
        .merge(auth_routes())
        .merge(node_routes())
        .merge(block_routes())
        .merge(theme_routes())
        .merge(account_routes())
        .merge(admin_routes());

    if state.config.api.enable_security_test_endpoint {
        tracing::warn!("Security test endpoint enabled at /api/v1/security/test");
        api = api.route("/security/test", get(handlers::system::security_test));
    }

    // outermost first
    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            security_headers_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.config.api.max_request_size_bytes));

    Router::new()
        .nest("/api/v1", api)
        .layer(layers)
        .with_state(state)
}

fn system_routes() -> Router<AppState> {
    use handlers::system;

    Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
}

fn auth_routes() -> Router<AppState> {
    use handlers::auth;

    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/me", get(auth::me))
}

fn node_routes() -> Router<AppState> {
    use handlers::nodes;

    Router::new()
        .route("/charaxy/nodes", get(nodes::list_nodes).post(nodes::create_node))
        .route(
            "/charaxy/nodes/:id",
            get(nodes::get_node)
                .put(nodes::update_node)
                .delete(nodes::delete_node),
        )
        .route("/charaxy/nodes/:id/blocks", get(nodes::list_node_blocks))
}

fn block_routes() -> Router<AppState> {
    use handlers::blocks;

    Router::new()
        .route("/charaxy/blocks", post(blocks::create_block))
        .route("/charaxy/blocks/reorder", put(blocks::reorder_blocks))
        .route(
            "/charaxy/blocks/:id",
            get(blocks::get_block)
                .put(blocks::update_block)
                .delete(blocks::delete_block),
        )
        .route("/charaxy/blocks/:id/theme", put(blocks::set_block_theme))
}

fn theme_routes() -> Router<AppState> {
    use handlers::themes;

    Router::new()
        .route("/charaxy/themes", get(themes::list_themes).post(themes::create_theme))
        .route(
            "/charaxy/themes/:id",
            get(themes::get_theme)
                .put(themes::update_theme)
                .delete(themes::delete_theme),
        )
        .route("/charaxy/themes/:id/blocks", get(themes::list_theme_blocks))
}

fn account_routes() -> Router<AppState> {
    use handlers::{activity, search, users};

    Router::new()
        .route("/charaxy/activity", get(activity::recent_activity))
        .route("/search", get(search::search))
        .route("/users", get(users::list_users))
        .route("/users/me", get(users::me).put(users::update_me))
        .route("/users/me/permissions", get(users::my_permissions))
        .route("/users/:id", get(users::get_user))
}

fn admin_routes() -> Router<AppState> {
    use handlers::admin;

    Router::new()
        .route("/admin", get(admin::overview))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id/role", put(admin::change_role))
        .route("/admin/system/users/:id/permissions", get(admin::user_permissions))
        .route(
            "/admin/system/users/:id/admin",
            post(admin::grant_admin).delete(admin::revoke_admin),
        )
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }
    if config.is_development() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}
