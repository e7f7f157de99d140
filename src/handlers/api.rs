//! HTTP endpoints around the gateway: accounts, tokens, message history and groups
//!
//! Handlers never reject; every failure is turned into a JSON
//! `{"error": reason}` body with a matching status code.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::password::{hash_password, verify_password};
use crate::auth::token::{extract_bearer_token, TokenClass};
use crate::core::message_types::DirectMessageFrame;
use crate::core::server::SharedChatServer;
use crate::error::{Result, RustyRelayError, ValidationKind};
use crate::handlers::uploads::upload_routes;
use crate::handlers::with_server;
use crate::storage::{GroupRole, NewUser, StoredUser};

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub(crate) type HandlerResult = std::result::Result<Box<dyn Reply>, Infallible>;

/// All HTTP routes except the WebSocket endpoint
pub fn api_routes(
    server: SharedChatServer,
) -> impl Filter<Extract = (Box<dyn Reply>,), Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| Box::new(warp::reply::json(&serde_json::json!({"status": "ok"}))) as Box<dyn Reply>);

    let signup = warp::path!("auth" / "signup")
        .and(warp::post())
        .and(json_body::<SignupRequest>())
        .and(with_server(server.clone()))
        .and_then(signup);

    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(json_body::<LoginRequest>())
        .and(with_server(server.clone()))
        .and_then(login);

    let refresh = warp::path!("auth" / "refresh")
        .and(warp::post())
        .and(bearer())
        .and(with_server(server.clone()))
        .and_then(refresh);

    let me = warp::path!("users" / "me")
        .and(warp::get())
        .and(bearer())
        .and(with_server(server.clone()))
        .and_then(me);

    let inbox = warp::path!("messages" / "inbox")
        .and(warp::get())
        .and(bearer())
        .and(with_server(server.clone()))
        .and_then(inbox);

    let send = warp::path!("messages" / "send")
        .and(warp::post())
        .and(bearer())
        .and(json_body::<DirectMessageFrame>())
        .and(with_server(server.clone()))
        .and_then(send_message);

    let sent = warp::path!("messages" / "sent")
        .and(warp::get())
        .and(bearer())
        .and(with_server(server.clone()))
        .and_then(sent);

    let create_group = warp::path!("groups")
        .and(warp::post())
        .and(bearer())
        .and(json_body::<CreateGroupRequest>())
        .and(with_server(server.clone()))
        .and_then(create_group);

    let add_member = warp::path!("groups" / i64 / "members")
        .and(warp::post())
        .and(bearer())
        .and(json_body::<AddMemberRequest>())
        .and(with_server(server.clone()))
        .and_then(add_member);

    health
        .or(signup)
        .unify()
        .or(login)
        .unify()
        .or(refresh)
        .unify()
        .or(me)
        .unify()
        .or(inbox)
        .unify()
        .or(send)
        .unify()
        .or(sent)
        .unify()
        .or(create_group)
        .unify()
        .or(add_member)
        .unify()
        .or(upload_routes(server))
        .unify()
}

fn json_body<T: for<'de> Deserialize<'de> + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

pub(crate) fn bearer() -> impl Filter<Extract = (Option<String>,), Error = Infallible> + Clone {
    warp::header::optional::<String>("authorization")
        .or(warp::any().map(|| None))
        .unify()
        .map(|header: Option<String>| header.as_deref().and_then(extract_bearer_token))
}

/// Map an error to its HTTP status
fn status_for(err: &RustyRelayError) -> StatusCode {
    match err {
        RustyRelayError::AuthError(_) => StatusCode::UNAUTHORIZED,
        RustyRelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RustyRelayError::Conflict(_) => StatusCode::CONFLICT,
        RustyRelayError::NotAMember { .. } => StatusCode::FORBIDDEN,
        RustyRelayError::ValidationError(ValidationKind::UnsupportedMediaType) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        RustyRelayError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RustyRelayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn respond<T: Serialize>(result: Result<T>, success: StatusCode) -> HandlerResult {
    match result {
        Ok(body) => Ok(Box::new(warp::reply::with_status(
            warp::reply::json(&body),
            success,
        ))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                log::error!("Request failed: {}", e);
            } else {
                log::debug!("Request rejected: {}", e);
            }
            Ok(Box::new(warp::reply::with_status(
                warp::reply::json(&ErrorBody {
                    error: e.error_reason(),
                }),
                status,
            )))
        }
    }
}

/// Resolve the caller of an authenticated endpoint
pub(crate) async fn current_user(
    token: Option<String>,
    class: TokenClass,
    server: &SharedChatServer,
) -> Result<StoredUser> {
    let token = token.ok_or_else(|| RustyRelayError::AuthError("Missing token".to_string()))?;
    let identity = server.identity.verify(&token).await?;
    if identity.token_class != class {
        return Err(RustyRelayError::AuthError(format!(
            "Expected a {:?} token",
            class
        )));
    }
    server
        .store
        .get_user(identity.user_id)
        .await?
        .ok_or_else(|| RustyRelayError::AuthError(format!("Unknown user {}", identity.user_id)))
}

fn required(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RustyRelayError::ValidationError(ValidationKind::MissingField(
            field.to_string(),
        )));
    }
    Ok(value.to_string())
}

async fn signup(request: SignupRequest, server: SharedChatServer) -> HandlerResult {
    let result = async {
        let username = required(&request.username, "username")?;
        let email = required(&request.email, "email")?;
        if request.password.is_empty() {
            return Err(RustyRelayError::ValidationError(ValidationKind::MissingField(
                "password".to_string(),
            )));
        }
        let user = server
            .store
            .create_user(NewUser {
                username,
                email,
                password_hash: hash_password(&request.password)?,
            })
            .await?;
        log::info!("Created user {} ({})", user.id, user.username);
        Ok::<_, RustyRelayError>(user)
    }
    .await;
    respond(result, StatusCode::CREATED)
}

async fn login(request: LoginRequest, server: SharedChatServer) -> HandlerResult {
    let result = async {
        let user = server
            .store
            .get_user_by_username(request.username.trim())
            .await?
            .filter(|user| verify_password(&request.password, &user.password_hash))
            .ok_or_else(|| RustyRelayError::AuthError("Invalid credentials".to_string()))?;
        server.tokens.issue_pair(user.id)
    }
    .await;
    respond(result, StatusCode::OK)
}

async fn refresh(token: Option<String>, server: SharedChatServer) -> HandlerResult {
    let result = async {
        let user = current_user(token, TokenClass::Refresh, &server).await?;
        server.tokens.issue_pair(user.id)
    }
    .await;
    respond(result, StatusCode::OK)
}

async fn me(token: Option<String>, server: SharedChatServer) -> HandlerResult {
    respond(
        current_user(token, TokenClass::Access, &server).await,
        StatusCode::OK,
    )
}

async fn inbox(token: Option<String>, server: SharedChatServer) -> HandlerResult {
    let result = async {
        let user = current_user(token, TokenClass::Access, &server).await?;
        server.store.inbox(user.id).await
    }
    .await;
    respond(result, StatusCode::OK)
}

// Stored for the recipient's next backlog replay; nothing is pushed live
async fn send_message(
    token: Option<String>,
    request: DirectMessageFrame,
    server: SharedChatServer,
) -> HandlerResult {
    let result = async {
        let user = current_user(token, TokenClass::Access, &server).await?;
        server.delivery.persist(user.id, request).await
    }
    .await;
    respond(result, StatusCode::CREATED)
}

async fn sent(token: Option<String>, server: SharedChatServer) -> HandlerResult {
    let result = async {
        let user = current_user(token, TokenClass::Access, &server).await?;
        server.store.sent(user.id).await
    }
    .await;
    respond(result, StatusCode::OK)
}

async fn create_group(
    token: Option<String>,
    request: CreateGroupRequest,
    server: SharedChatServer,
) -> HandlerResult {
    let result = async {
        let user = current_user(token, TokenClass::Access, &server).await?;
        let name = required(&request.name, "name")?;
        let group = server.store.create_group(&name, user.id).await?;
        log::info!("User {} created group {} ({})", user.id, group.id, group.name);
        Ok::<_, RustyRelayError>(group)
    }
    .await;
    respond(result, StatusCode::CREATED)
}

async fn add_member(
    group_id: i64,
    token: Option<String>,
    request: AddMemberRequest,
    server: SharedChatServer,
) -> HandlerResult {
    let result = async {
        let user = current_user(token, TokenClass::Access, &server).await?;
        if server.store.get_group(group_id).await?.is_none() {
            return Err(RustyRelayError::NotFound(format!("group {}", group_id)));
        }
        match server.store.get_membership(group_id, user.id).await? {
            Some(membership) if membership.role == GroupRole::Admin => {}
            _ => return Err(RustyRelayError::NotAMember { group_id }),
        }
        server
            .store
            .add_member(group_id, request.user_id, GroupRole::Member)
            .await
    }
    .await;
    respond(result, StatusCode::CREATED)
}
