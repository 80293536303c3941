//! Authentication collaborator.
//!
//! Token issuance lives outside this crate; the gateway only needs a
//! validation seam for the connection handshake.

use async_trait::async_trait;
use thiserror::Error;

/// Identity attached to a connection after a successful handshake.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    pub user_id: String,
    pub email: String,
}

/// Errors raised by the auth collaborator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is invalid")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("auth service unavailable: {0}")]
    Unavailable(String),
}

/// Token validation seam consumed by the gateway.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Validate a bearer token, returning the caller's identity.
    async fn validate_token(&self, token: &str) -> Result<AuthClaims, AuthError>;
}

/// Development-mode validator: any non-empty token is accepted and doubles
/// as the user id. Not for production deployments.
pub struct DevAuthService;

#[async_trait]
impl AuthService for DevAuthService {
    async fn validate_token(&self, token: &str) -> Result<AuthClaims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(AuthClaims {
            user_id: token.to_string(),
            email: format!("{token}@localhost"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dev_auth_rejects_empty_tokens() {
        assert!(DevAuthService.validate_token("").await.is_err());
        let claims = DevAuthService.validate_token("trainee-7").await.unwrap();
        assert_eq!(claims.user_id, "trainee-7");
    }
}
