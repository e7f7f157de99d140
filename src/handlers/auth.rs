//! Authentication of WebSocket handshakes

use std::collections::HashMap;
use warp::http::HeaderMap;

use crate::auth::token::extract_bearer_token;
use crate::auth::user::User;
use crate::constants::MAX_TOKEN_LENGTH;
use crate::core::server::ChatServer;
use crate::error::{Result, RustyRelayError};

const SUBPROTOCOL_PREFIX: &str = "bearer.";

/// The `bearer.<token>` entry of the Sec-WebSocket-Protocol header, if offered.
/// The gateway echoes it back so browsers accept the upgrade.
pub fn bearer_subprotocol(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("sec-websocket-protocol")?.to_str().ok()?;
    header
        .split(',')
        .map(str::trim)
        .find(|protocol| protocol.starts_with(SUBPROTOCOL_PREFIX))
        .map(str::to_string)
}

/// Extract the bearer token of a handshake.
///
/// Checked in order: Authorization header, `bearer.` subprotocol,
/// X-Auth-Token header, then the `token` query parameter for clients
/// that cannot set headers on a WebSocket request.
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(auth_header) = headers.get("authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = extract_bearer_token(auth_header) {
            log::debug!("Token extracted from Authorization header");
            return Some(token);
        }
    }

    if let Some(token) = bearer_subprotocol(headers)
        .and_then(|p| p.strip_prefix(SUBPROTOCOL_PREFIX).map(str::to_string))
        .filter(|t| !t.is_empty())
    {
        log::debug!("Token extracted from WebSocket subprotocol");
        return Some(token);
    }

    if let Some(token) = headers
        .get("x-auth-token")
        .and_then(|h| h.to_str().ok())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
    {
        log::debug!("Token extracted from X-Auth-Token header");
        return Some(token);
    }

    let token = query.get("token").map(|t| t.trim()).filter(|t| !t.is_empty())?;
    if token.len() > MAX_TOKEN_LENGTH {
        log::warn!("Ignoring oversized token query parameter");
        return None;
    }
    log::debug!("Token extracted from query string");
    Some(token.to_string())
}

/// Resolve the user a handshake token belongs to.
/// Only an unexpired access token of an existing user opens a session.
pub async fn authenticate_handshake(token: Option<String>, server: &ChatServer) -> Result<User> {
    let token = token.ok_or_else(|| RustyRelayError::AuthError("Missing token".to_string()))?;
    let identity = server.identity.verify(&token).await?.require_access()?;

    let user = server
        .store
        .get_user(identity.user_id)
        .await?
        .ok_or_else(|| RustyRelayError::AuthError(format!("Unknown user {}", identity.user_id)))?;

    Ok(User::new(user.id, user.username))
}
