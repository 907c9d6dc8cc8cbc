pub mod accounts;
pub mod jwt;
pub mod password;
pub mod supabase;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::rbac::Role;
use crate::store::{EntityStore, StoreError};

pub use accounts::{AccountProvider, LocalAccounts, Session};
pub use jwt::{Claims, JwtProvider};
pub use supabase::SupabaseProvider;

/// Caller identity for one request. The role is resolved from the `users`
/// row at authentication time and does not change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: Role,
}

/// What an identity provider vouches for
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header missing")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    Expired,

    #[error("Unknown user")]
    UnknownUser,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("{0}")]
    WeakPassword(String),

    /// The identity provider refused an account request
    #[error("{0}")]
    Rejected(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Identity provider not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Identity provider error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// A provider looked at the token and said no
    pub fn is_rejection(&self) -> bool {
        matches!(self, AuthError::InvalidToken(_) | AuthError::Expired)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Tries each provider in order and returns the first success. An explicit
/// rejection ends the search; only unreachable or unconfigured providers
/// fall through to the next one.
pub struct ProviderChain {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>) -> Self {
        Self { providers }
    }

    /// Remote BaaS lookup first (when configured), then local HS256 verification.
    pub fn from_config(config: &AppConfig) -> Result<Self, AuthError> {
        let mut providers: Vec<Arc<dyn IdentityProvider>> = Vec::new();

        if let Some(remote) = SupabaseProvider::from_config(&config.supabase)? {
            providers.push(Arc::new(remote));
        }

        if !config.security.jwt_secret.is_empty() {
            providers.push(Arc::new(JwtProvider::new(
                config.security.jwt_secret.clone(),
                config.security.jwt_expiry_hours,
            )));
        }

        if providers.is_empty() {
            return Err(AuthError::NotConfigured("no identity provider"));
        }

        Ok(Self::new(providers))
    }

    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let mut last_error = AuthError::NotConfigured("no identity provider");

        for provider in &self.providers {
            match provider.verify(token).await {
                Ok(identity) => {
                    tracing::debug!(provider = provider.name(), user_id = %identity.id, "Token verified");
                    return Ok(identity);
                }
                Err(e) if e.is_rejection() => {
                    tracing::info!(provider = provider.name(), error = %e, "Token rejected");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Identity provider unavailable, trying next provider");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

fn revocation_list(ttl: Duration) -> Cache<String, ()> {
    Cache::builder().max_capacity(100_000).time_to_live(ttl).build()
}

/// Bearer token → `AuthenticatedUser`, with the role read from the datastore.
/// Signed-out tokens are remembered until they would have expired anyway.
pub struct Authenticator {
    providers: ProviderChain,
    store: Arc<dyn EntityStore>,
    revoked: Cache<String, ()>,
}

impl Authenticator {
    pub fn new(providers: ProviderChain, store: Arc<dyn EntityStore>) -> Self {
        Self {
            providers,
            store,
            revoked: revocation_list(Duration::from_secs(24 * 3_600)),
        }
    }

    /// Keep revoked tokens for `ttl`, normally the access token lifetime
    pub fn with_revocation_window(mut self, ttl: Duration) -> Self {
        self.revoked = revocation_list(ttl);
        self
    }

    pub fn revoke(&self, token: &str) {
        self.revoked.insert(token.to_string(), ());
    }

    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if self.revoked.contains_key(token) {
            return Err(AuthError::InvalidToken("token has been revoked".into()));
        }

        let identity = self.providers.verify(token).await?;

        let user = self
            .store
            .get_user(identity.id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = %identity.id, "Authenticated identity has no users row");
                AuthError::UnknownUser
            })?;

        let role = Role::resolve(user.role.as_deref());
        tracing::info!(user_id = %user.id, role = %role, "User authenticated");

        Ok(AuthenticatedUser {
            id: user.id,
            email: user.email.or(identity.email),
            role,
        })
    }
}

/// Extract Bearer token from Authorization header
///
/// Parses "Bearer <token>" format and returns the token portion.
pub fn extract_bearer_token(auth_header: &str) -> Result<String, AuthError> {
    const BEARER_PREFIX: &str = "Bearer ";

    let token = auth_header
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| AuthError::InvalidToken("Authorization header must start with 'Bearer '".into()))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token.to_string())
}
