//! Identity verification used by the gateway handshake
//!
//! The gateway only needs to know who a bearer token belongs to and
//! whether it is an access token; how tokens are minted is not its concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::auth::token::{TokenClass, TokenManager};
use crate::error::{Result, RustyRelayError};

/// Result of a successful token verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: i64,
    pub token_class: TokenClass,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedIdentity {
    /// Only unexpired access tokens may open a session
    pub fn require_access(self) -> Result<Self> {
        if self.token_class != TokenClass::Access {
            return Err(RustyRelayError::AuthError("Not an access token".to_string()));
        }
        if self.expires_at <= Utc::now() {
            return Err(RustyRelayError::AuthError("Token expired".to_string()));
        }
        Ok(self)
    }
}

/// Trait for identity services
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Verify a bearer token and return the identity it carries
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity>;
}

/// JWT-based identity service
pub struct JwtIdentityService {
    tokens: Arc<TokenManager>,
}

impl JwtIdentityService {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityService for JwtIdentityService {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity> {
        let claims = self.tokens.get_claims(token)?;
        Ok(VerifiedIdentity {
            user_id: claims.user_id,
            token_class: claims.token_class,
            expires_at: claims.expires_at(),
        })
    }
}
