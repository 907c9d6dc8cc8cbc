//! Account lifecycle behind `/auth/*`.
//!
//! With `SUPABASE_URL` set, sign-up and sign-in are forwarded to the BaaS.
//! Otherwise `LocalAccounts` keeps bcrypt credentials in the datastore and
//! mints HS256 access tokens with opaque, rotating refresh tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use uuid::Uuid;

use super::password::{hash_password, validate_password, verify_password};
use super::{AuthError, JwtProvider, SupabaseProvider};
use crate::config::AppConfig;
use crate::store::{Credentials, EntityStore, StoreError};

/// Tokens handed back by sign-up, sign-in and refresh
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[async_trait]
pub trait AccountProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Trade a refresh token for a new session. Refresh tokens are single use.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

/// Remote accounts when the BaaS is configured, local ones otherwise
pub fn from_config(config: &AppConfig, store: Arc<dyn EntityStore>) -> Result<Arc<dyn AccountProvider>, AuthError> {
    if let Some(remote) = SupabaseProvider::from_config(&config.supabase)? {
        return Ok(Arc::new(remote));
    }
    if config.security.jwt_secret.is_empty() {
        return Err(AuthError::NotConfigured("SECURITY_JWT_SECRET"));
    }

    let jwt = JwtProvider::new(config.security.jwt_secret.clone(), config.security.jwt_expiry_hours);
    Ok(Arc::new(LocalAccounts::new(store, jwt, config.security.password_hash_cost)))
}

#[derive(Debug, Clone)]
struct Grant {
    user_id: Uuid,
    email: Option<String>,
}

pub struct LocalAccounts {
    store: Arc<dyn EntityStore>,
    jwt: JwtProvider,
    hash_cost: u32,
    refresh_tokens: Cache<String, Grant>,
}

impl LocalAccounts {
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3_600);

    pub fn new(store: Arc<dyn EntityStore>, jwt: JwtProvider, hash_cost: u32) -> Self {
        let refresh_tokens = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Self::REFRESH_TOKEN_TTL)
            .support_invalidation_closures()
            .build();

        Self {
            store,
            jwt,
            hash_cost,
            refresh_tokens,
        }
    }

    fn open_session(&self, user_id: Uuid, email: Option<String>) -> Result<Session, AuthError> {
        let access_token = self.jwt.issue_token(user_id, email.clone())?;
        let refresh_token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        self.refresh_tokens.insert(
            refresh_token.clone(),
            Grant {
                user_id,
                email: email.clone(),
            },
        );

        Ok(Session {
            user_id,
            email,
            access_token,
            refresh_token,
            expires_in: self.jwt.expires_in(),
        })
    }
}

#[async_trait]
impl AccountProvider for LocalAccounts {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        validate_password(password)?;
        if self.store.get_credentials(email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let credentials = Credentials {
            user_id: Uuid::new_v4(),
            email: email.to_lowercase(),
            password_hash: hash_password(password, self.hash_cost).await?,
        };
        let user_id = credentials.user_id;
        self.store.save_credentials(credentials).await.map_err(|e| match e {
            StoreError::Conflict(_) => AuthError::EmailTaken,
            other => AuthError::Store(other),
        })?;

        tracing::info!(user_id = %user_id, "Local account created");
        self.open_session(user_id, Some(email.to_lowercase()))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let credentials = self
            .store
            .get_credentials(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &credentials.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }
        self.open_session(credentials.user_id, Some(credentials.email))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let unknown = || AuthError::InvalidToken("unknown or expired refresh token".into());
        // `get` honours sign-out invalidation; `remove` makes the token single use
        let grant = self.refresh_tokens.get(refresh_token).ok_or_else(unknown)?;
        self.refresh_tokens.remove(refresh_token).ok_or_else(unknown)?;
        self.open_session(grant.user_id, grant.email)
    }

    /// Drops every refresh token of the caller; the access token itself is
    /// revoked by the `Authenticator`.
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let user_id = self.jwt.decode_claims(access_token)?.sub;
        if let Err(e) = self
            .refresh_tokens
            .invalidate_entries_if(move |_, grant| grant.user_id == user_id)
        {
            tracing::warn!(user_id = %user_id, error = %e, "Could not drop refresh tokens");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityProvider;
    use crate::store::MemoryStore;

    fn accounts() -> LocalAccounts {
        LocalAccounts::new(Arc::new(MemoryStore::new()), JwtProvider::new("accounts-secret", 1), 4)
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let accounts = accounts();
        let created = accounts.sign_up("Rin@Example.com", "hunter2hunter2").await.unwrap();
        assert_eq!(created.email.as_deref(), Some("rin@example.com"));
        assert_eq!(created.expires_in, 3_600);

        let session = accounts.sign_in("rin@example.com", "hunter2hunter2").await.unwrap();
        assert_eq!(session.user_id, created.user_id);

        let identity = JwtProvider::new("accounts-secret", 1)
            .verify(&session.access_token)
            .await
            .unwrap();
        assert_eq!(identity.id, created.user_id);
    }

    #[tokio::test]
    async fn duplicate_and_weak_sign_ups_fail() {
        let accounts = accounts();
        accounts.sign_up("rin@example.com", "hunter2hunter2").await.unwrap();

        assert!(matches!(
            accounts.sign_up("RIN@example.com", "another-password").await,
            Err(AuthError::EmailTaken)
        ));
        assert!(matches!(
            accounts.sign_up("new@example.com", "short").await,
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let accounts = accounts();
        accounts.sign_up("rin@example.com", "hunter2hunter2").await.unwrap();

        assert!(matches!(
            accounts.sign_in("rin@example.com", "not-the-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            accounts.sign_in("nobody@example.com", "hunter2hunter2").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn refresh_tokens_rotate() {
        let accounts = accounts();
        let first = accounts.sign_up("rin@example.com", "hunter2hunter2").await.unwrap();

        let second = accounts.refresh(&first.refresh_token).await.unwrap();
        assert_eq!(second.user_id, first.user_id);
        assert_ne!(second.refresh_token, first.refresh_token);

        assert!(matches!(
            accounts.refresh(&first.refresh_token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn sign_out_drops_refresh_tokens() {
        let accounts = accounts();
        let session = accounts.sign_up("rin@example.com", "hunter2hunter2").await.unwrap();

        accounts.sign_out(&session.access_token).await.unwrap();
        assert!(accounts.refresh(&session.refresh_token).await.is_err());
    }
}
