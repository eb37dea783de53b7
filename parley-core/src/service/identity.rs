//! Identity verification
//!
//! The relay never issues credentials on behalf of users; it only checks the
//! bearer tokens produced by the login service. `JwtIdentityService` verifies
//! HS256 tokens carrying `{id, username}` claims.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::AuthConfig,
    models::{Identity, UserId},
    Error, Result,
};

/// Verifies a bearer credential and returns who it belongs to
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Returns `Error::Authentication` for any invalid, expired or malformed token.
    async fn verify(&self, token: &str) -> Result<Identity>;
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub username: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// HS256 JWT identity service
#[derive(Clone)]
pub struct JwtIdentityService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    leeway_seconds: u64,
    token_ttl: Duration,
}

impl std::fmt::Debug for JwtIdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityService")
            .field("leeway_seconds", &self.leeway_seconds)
            .finish_non_exhaustive()
    }
}

impl JwtIdentityService {
    #[must_use]
    pub fn new(secret: &[u8], leeway_seconds: u64, token_ttl: Duration) -> Self {
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            leeway_seconds,
            token_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            return Err(Error::InvalidInput("JWT secret is empty".to_string()));
        }
        let ttl_hours = i64::try_from(config.token_ttl_hours)
            .map_err(|_| Error::InvalidInput("token_ttl_hours is too large".to_string()))?;
        Ok(Self::new(
            config.jwt_secret.as_bytes(),
            config.leeway_seconds,
            Duration::hours(ttl_hours),
        ))
    }

    /// Sign a token for `identity`. Used by the `issue-token` command and tests.
    pub fn issue(&self, identity: &Identity) -> Result<String> {
        self.issue_with_ttl(identity, self.token_ttl)
    }

    pub fn issue_with_ttl(&self, identity: &Identity, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            id: identity.id.as_i64(),
            username: identity.username.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    /// Verify a token and extract claims
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = self.leeway_seconds;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::Authentication("Token expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    Error::Authentication("Invalid token signature".to_string())
                }
                _ => Error::Authentication(format!("Token verification failed: {e}")),
            })
    }
}

#[async_trait]
impl IdentityService for JwtIdentityService {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let claims = self.verify_token(token)?;
        if claims.username.trim().is_empty() {
            return Err(Error::Authentication("Token carries no username".to_string()));
        }
        Ok(Identity {
            id: UserId::new(claims.id),
            username: claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtIdentityService {
        JwtIdentityService::new(b"test-secret", 0, Duration::hours(1))
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let svc = service();
        let token = svc.issue(&Identity::new(5, "alice")).unwrap();

        let identity = svc.verify(&token).await.unwrap();
        assert_eq!(identity.id, UserId::new(5));
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let svc = service();
        let token = svc
            .issue_with_ttl(&Identity::new(5, "alice"), Duration::hours(-2))
            .unwrap();

        let err = svc.verify(&token).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(msg) if msg == "Token expired"));
    }

    #[tokio::test]
    async fn test_foreign_signature_rejected() {
        let other = JwtIdentityService::new(b"other-secret", 0, Duration::hours(1));
        let token = other.issue(&Identity::new(9, "mallory")).unwrap();

        assert!(matches!(
            service().verify(&token).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        assert!(matches!(
            service().verify("not-a-jwt").await,
            Err(Error::Authentication(_))
        ));
        assert!(matches!(service().verify("").await, Err(Error::Authentication(_))));
    }

    #[test]
    fn test_from_config_requires_secret() {
        assert!(JwtIdentityService::from_config(&AuthConfig::default()).is_err());

        let config = AuthConfig {
            jwt_secret: "s3cret".to_string(),
            ..AuthConfig::default()
        };
        assert!(JwtIdentityService::from_config(&config).is_ok());
    }
}
