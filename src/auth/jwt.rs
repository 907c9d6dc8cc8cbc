use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AuthError, IdentityProvider, VerifiedIdentity};

/// HS256 claims. `sub` is the user id, as issued by the BaaS.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(sub: Uuid, email: Option<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub,
            email,
            aud: Some("authenticated".to_string()),
            exp,
            iat: now.timestamp(),
        }
    }
}

/// Local token verification with the shared secret
pub struct JwtProvider {
    secret: String,
    expiry_hours: u64,
}

impl JwtProvider {
    pub fn new(secret: impl Into<String>, expiry_hours: u64) -> Self {
        Self {
            secret: secret.into(),
            expiry_hours,
        }
    }

    /// Access token lifetime in seconds
    pub fn expires_in(&self) -> u64 {
        self.expiry_hours * 3_600
    }

    /// Mint an access token for a locally managed account.
    pub fn issue_token(&self, user_id: Uuid, email: Option<String>) -> Result<String, AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::NotConfigured("jwt secret"));
        }

        let claims = Claims::new(user_id, email, self.expiry_hours);
        let encoding_key = EncodingKey::from_secret(self.secret.as_bytes());

        encode(&Header::default(), &claims, &encoding_key)
            .map_err(|e| AuthError::Upstream(format!("JWT generation error: {}", e)))
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::NotConfigured("jwt secret"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // BaaS tokens carry aud=authenticated; locally minted ones may not
        validation.validate_aud = false;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtProvider {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let claims = self.decode_claims(token)?;
        Ok(VerifiedIdentity {
            id: claims.sub,
            email: claims.email,
        })
    }
}
