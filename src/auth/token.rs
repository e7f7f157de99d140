use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_TOKEN_LENGTH;
use crate::error::{Result, RustyRelayError};

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    /// Short-lived token accepted by the gateway and the HTTP API
    Access,
    /// Long-lived token only accepted by the refresh endpoint
    Refresh,
}

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id
    pub user_id: i64,
    /// Token class
    #[serde(rename = "type")]
    pub token_class: TokenClass,
    /// Expiration time (as UTC timestamp)
    pub exp: i64,
    /// Issued at (as UTC timestamp)
    pub iat: i64,
}

impl Claims {
    /// Creates claims for a user that expire after `ttl`
    pub fn new(user_id: i64, token_class: TokenClass, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            token_class,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }

    /// Expiry as a UTC instant
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// Access and refresh tokens issued together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

/// Manages JWT token operations
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

impl TokenManager {
    /// Creates a new token manager with a secret and token lifetimes
    pub fn new(secret: &str, access_ttl: chrono::Duration, refresh_ttl: chrono::Duration) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Generates a JWT token for the given claims
    pub fn generate_token(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| RustyRelayError::AuthError(format!("Failed to generate token: {}", e)))
    }

    /// Issue a fresh access/refresh pair for a user
    pub fn issue_pair(&self, user_id: i64) -> Result<TokenPair> {
        let access = Claims::new(user_id, TokenClass::Access, self.access_ttl);
        let refresh = Claims::new(user_id, TokenClass::Refresh, self.refresh_ttl);
        Ok(TokenPair {
            access_token: self.generate_token(&access)?,
            refresh_token: self.generate_token(&refresh)?,
            token_type: "bearer".to_string(),
        })
    }

    /// Validates and decodes a JWT token
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
            return Err(RustyRelayError::AuthError("Malformed token".to_string()));
        }
        if token.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(RustyRelayError::AuthError(
                "Token contains invalid characters".to_string(),
            ));
        }
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation)?)
    }

    /// Extracts claims from a token string
    pub fn get_claims(&self, token: &str) -> Result<Claims> {
        let claims = self.validate_token(token)?.claims;
        if claims.is_expired() {
            return Err(RustyRelayError::AuthError("Token expired".to_string()));
        }
        Ok(claims)
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
