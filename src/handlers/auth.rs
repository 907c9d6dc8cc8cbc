// handlers/auth.rs - account sign-up, sign-in and session handling
//
// Register, login and refresh run through `Pipeline::run_public`: they are
// rate limited, sanitized and audited, but no bearer token is required.

use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::message;
use super::users::{load_profile, Profile};
use crate::auth::{extract_bearer_token, AuthenticatedUser, Session};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestMeta};
use crate::pipeline::{operation, Body, Handled};
use crate::security::sanitizer::validate_email;
use crate::store::{EntityStore, User};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshForm {
    pub refresh_token: String,
}

/// Body of every route that opens a session
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub refresh_token: String,
    pub user: Profile,
}

impl TokenResponse {
    fn new(session: Session, user: &User) -> Self {
        Self {
            access_token: session.access_token,
            token_type: "bearer",
            expires_in: session.expires_in,
            refresh_token: session.refresh_token,
            user: Profile::from(user),
        }
    }
}

fn normalized_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if !validate_email(&email) {
        return Err(ApiError::validation("Invalid email address"));
    }
    Ok(email)
}

fn actor(user: &User) -> AuthenticatedUser {
    AuthenticatedUser {
        id: user.id,
        email: user.email.clone(),
        role: user.resolved_role(),
    }
}

async fn session_user(store: &dyn EntityStore, session: &Session) -> Result<User, ApiError> {
    store.get_user(session.user_id).await?.ok_or_else(|| {
        tracing::warn!(user_id = %session.user_id, "Signed-in account has no users row");
        ApiError::not_found("User not found")
    })
}

/// POST /api/v1/auth/register - 3/min per client
pub async fn register(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<TokenResponse> {
    let store = state.store.clone();
    let accounts = state.accounts.clone();

    let tokens = state
        .pipeline
        .run_public(&operation::AUTH_REGISTER, meta, Some(payload), |anon| async move {
            let form: SignInForm = anon.parse()?;
            let email = normalized_email(&form.email)?;
            if store.find_user_by_email(&email).await?.is_some() {
                return Err(ApiError::validation("Email is already registered"));
            }

            let session = accounts.sign_up(&email, &form.password).await?;
            let user = store.create_user(User::new(session.user_id, &email, None)).await?;
            tracing::info!(user_id = %user.id, provider = accounts.name(), "User registered");

            Ok(Handled::new(TokenResponse::new(session, &user))
                .resource(user.id)
                .actor(actor(&user))
                .changes(None, Some(user.snapshot())))
        })
        .await?;

    Ok(ApiResponse::created(tokens))
}

/// POST /api/v1/auth/login - 5/min per client
pub async fn login(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<TokenResponse> {
    let store = state.store.clone();
    let accounts = state.accounts.clone();

    let tokens = state
        .pipeline
        .run_public(&operation::AUTH_LOGIN, meta, Some(payload), |anon| async move {
            let form: SignInForm = anon.parse()?;
            let email = form.email.trim().to_lowercase();

            let session = accounts.sign_in(&email, &form.password).await?;
            let user = session_user(store.as_ref(), &session).await?;
            Ok(Handled::new(TokenResponse::new(session, &user))
                .resource(user.id)
                .actor(actor(&user)))
        })
        .await?;

    Ok(ApiResponse::success(tokens))
}

/// POST /api/v1/auth/refresh - the presented refresh token is consumed
pub async fn refresh(State(state): State<AppState>, meta: RequestMeta, payload: Body) -> ApiResult<TokenResponse> {
    let store = state.store.clone();
    let accounts = state.accounts.clone();

    let tokens = state
        .pipeline
        .run_public(&operation::AUTH_REFRESH, meta, Some(payload), |anon| async move {
            let form: RefreshForm = anon.parse()?;
            if form.refresh_token.is_empty() {
                return Err(ApiError::validation("refresh_token is required"));
            }

            let session = accounts.refresh(&form.refresh_token).await?;
            let user = session_user(store.as_ref(), &session).await?;
            Ok(Handled::new(TokenResponse::new(session, &user))
                .resource(user.id)
                .actor(actor(&user)))
        })
        .await?;

    Ok(ApiResponse::success(tokens))
}

/// POST /api/v1/auth/logout - the access token stops working immediately
pub async fn logout(State(state): State<AppState>, meta: RequestMeta) -> ApiResult<serde_json::Value> {
    let accounts = state.accounts.clone();
    let authenticator = state.authenticator.clone();
    let token = meta
        .authorization
        .as_deref()
        .and_then(|header| extract_bearer_token(header).ok());

    let body = state
        .pipeline
        .run(&operation::AUTH_LOGOUT, meta, None, |g| async move {
            // the authenticate stage has already accepted this token
            let token = token.ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;
            if let Err(e) = accounts.sign_out(&token).await {
                tracing::warn!(user_id = %g.user.id, error = %e, "Provider sign-out failed");
            }
            authenticator.revoke(&token);
            tracing::info!(user_id = %g.user.id, "User logged out");
            Ok(Handled::new(message("Logged out")).resource(g.user.id))
        })
        .await?;

    Ok(ApiResponse::success(body))
}

/// GET /api/v1/auth/me
pub async fn me(State(state): State<AppState>, meta: RequestMeta) -> ApiResult<Profile> {
    let store = state.store.clone();

    let profile = state
        .pipeline
        .run(&operation::AUTH_ME, meta, None, |g| async move {
            let profile = load_profile(store.as_ref(), &g.user).await?;
            Ok(Handled::new(profile).resource(g.user.id))
        })
        .await?;

    Ok(ApiResponse::success(profile))
}
