use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::accounts::{AccountProvider, Session};
use super::{AuthError, IdentityProvider, VerifiedIdentity};
use crate::config::SupabaseConfig;

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: Uuid,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteSession {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    user: Option<RemoteUser>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteError {
    msg: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

/// Resolves bearer tokens against the BaaS `/auth/v1/user` endpoint and
/// forwards account requests to its auth API.
#[derive(Clone)]
pub struct SupabaseProvider {
    client: reqwest::Client,
    base: url::Url,
    user_endpoint: url::Url,
    api_key: String,
}

fn bad_url(e: url::ParseError) -> AuthError {
    AuthError::Upstream(format!("invalid SUPABASE_URL: {}", e))
}

impl SupabaseProvider {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, AuthError> {
        let base = url::Url::parse(base_url).map_err(bad_url)?;
        let user_endpoint = base.join("/auth/v1/user").map_err(bad_url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            base,
            user_endpoint,
            api_key: api_key.into(),
        })
    }

    /// `None` when no `SUPABASE_URL` is configured
    pub fn from_config(config: &SupabaseConfig) -> Result<Option<Self>, AuthError> {
        let Some(url) = &config.url else {
            return Ok(None);
        };
        let key = config
            .anon_key
            .clone()
            .or_else(|| config.service_role_key.clone())
            .ok_or(AuthError::NotConfigured("SUPABASE_ANON_KEY"))?;
        Self::new(url, key, config.timeout_secs).map(Some)
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, AuthError> {
        self.base.join(path).map_err(bad_url)
    }

    /// POST to the auth API and turn the reply into a session. Client
    /// errors become `on_reject` carrying the provider's message.
    async fn session_request(
        &self,
        path: &str,
        body: serde_json::Value,
        on_reject: fn(String) -> AuthError,
    ) -> Result<Session, AuthError> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let reason: RemoteError = response.json().await.unwrap_or_default();
            let message = reason
                .msg
                .or(reason.error_description)
                .or(reason.message)
                .unwrap_or_else(|| status.to_string());
            return Err(on_reject(message));
        }
        if !status.is_success() {
            return Err(AuthError::Upstream(format!("identity provider returned {}", status)));
        }

        let remote: RemoteSession = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("malformed session payload: {}", e)))?;
        let (Some(access_token), Some(user)) = (remote.access_token, remote.user) else {
            return Err(AuthError::Rejected(
                "Account requires email confirmation before sign-in".into(),
            ));
        };

        Ok(Session {
            user_id: user.id,
            email: user.email,
            access_token,
            refresh_token: remote.refresh_token.unwrap_or_default(),
            expires_in: remote.expires_in.unwrap_or(3_600),
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseProvider {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let response = self
            .client
            .get(self.user_endpoint.clone())
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::InvalidToken("rejected by identity provider".into()))
            }
            other => return Err(AuthError::Upstream(format!("identity provider returned {}", other))),
        }

        let user: RemoteUser = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("malformed user payload: {}", e)))?;

        Ok(VerifiedIdentity {
            id: user.id,
            email: user.email,
        })
    }
}

#[async_trait]
impl AccountProvider for SupabaseProvider {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.session_request(
            "/auth/v1/signup",
            json!({ "email": email, "password": password }),
            AuthError::Rejected,
        )
        .await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.session_request(
            "/auth/v1/token?grant_type=password",
            json!({ "email": email, "password": password }),
            |_| AuthError::InvalidCredentials,
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        self.session_request(
            "/auth/v1/token?grant_type=refresh_token",
            json!({ "refresh_token": refresh_token }),
            AuthError::InvalidToken,
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.endpoint("/auth/v1/logout")?)
            .bearer_auth(access_token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AuthError::InvalidToken("rejected by identity provider".into()))
            }
            other => Err(AuthError::Upstream(format!("identity provider returned {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_user_endpoint_from_base() {
        let provider = SupabaseProvider::new("https://project.supabase.co", "anon", 5).unwrap();
        assert_eq!(
            provider.user_endpoint.as_str(),
            "https://project.supabase.co/auth/v1/user"
        );
        assert_eq!(
            provider.endpoint("/auth/v1/token?grant_type=password").unwrap().as_str(),
            "https://project.supabase.co/auth/v1/token?grant_type=password"
        );
    }

    #[test]
    fn rejects_malformed_base_url() {
        assert!(SupabaseProvider::new("not a url", "anon", 5).is_err());
    }

    #[test]
    fn needs_a_key_once_a_url_is_set() {
        let mut config = SupabaseConfig {
            url: None,
            anon_key: None,
            service_role_key: None,
            timeout_secs: 5,
        };
        assert!(SupabaseProvider::from_config(&config).unwrap().is_none());

        config.url = Some("https://project.supabase.co".into());
        assert!(matches!(
            SupabaseProvider::from_config(&config),
            Err(AuthError::NotConfigured(_))
        ));

        config.service_role_key = Some("service".into());
        assert!(SupabaseProvider::from_config(&config).unwrap().is_some());
    }
}
