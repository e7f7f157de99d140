// HTTP API tests using warp's request test client

mod common;

use serde_json::{json, Value};
use warp::http::StatusCode;

use common::relay;
use rusty_relay::core::server::SharedChatServer;
use rusty_relay::handlers::routes;

async fn call(
    server: &SharedChatServer,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = warp::test::request().method(method).path(path);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.reply(&routes(server.clone())).await;
    let value = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (response.status(), value)
}

async fn signup_and_login(server: &SharedChatServer, name: &str) -> (i64, Value) {
    let (status, user) = call(
        server,
        "POST",
        "/auth/signup",
        None,
        Some(json!({"username": name, "email": format!("{}@example.com", name), "password": "hunter22"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, tokens) = call(
        server,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username": name, "password": "hunter22"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (user["id"].as_i64().unwrap(), tokens)
}

#[tokio::test]
async fn test_health() {
    let relay = relay().await;
    let (status, body) = call(&relay.server, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_signup_login_and_refresh() {
    let relay = relay().await;
    let server = &relay.server;
    let (user_id, tokens) = signup_and_login(server, "alice").await;
    assert_eq!(tokens["token_type"], "bearer");

    // Duplicate username
    let (status, body) = call(
        server,
        "POST",
        "/auth/signup",
        None,
        Some(json!({"username": "alice", "email": "other@example.com", "password": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    // Wrong password
    let (status, _) = call(
        server,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username": "alice", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let (status, me) = call(server, "GET", "/users/me", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id);
    assert_eq!(me["username"], "alice");
    assert_eq!(me["presence_status"], "offline");
    assert!(me.get("password_hash").is_none());

    // Refresh only accepts refresh tokens
    let (status, _) = call(server, "POST", "/auth/refresh", Some(access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, renewed) = call(server, "POST", "/auth/refresh", Some(refresh), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(renewed["access_token"].is_string());

    // And refresh tokens are not accepted elsewhere
    let (status, _) = call(server, "GET", "/users/me", Some(refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(server, "GET", "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_groups_and_members() {
    let relay = relay().await;
    let server = &relay.server;
    let (_, alice_tokens) = signup_and_login(server, "alice").await;
    let (bob_id, bob_tokens) = signup_and_login(server, "bob").await;
    let alice = alice_tokens["access_token"].as_str().unwrap();
    let bob = bob_tokens["access_token"].as_str().unwrap();

    let (status, group) = call(server, "POST", "/groups", Some(alice), Some(json!({"name": "team"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = group["id"].as_i64().unwrap();

    let path = format!("/groups/{}/members", group_id);
    let (status, membership) = call(server, "POST", &path, Some(alice), Some(json!({"user_id": bob_id}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(membership["role"], "member");
    assert_eq!(membership["last_read_message_id"], 0);

    let (status, _) = call(server, "POST", &path, Some(alice), Some(json!({"user_id": bob_id}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(server, "POST", &path, Some(alice), Some(json!({"user_id": 9999}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(server, "POST", "/groups/9999/members", Some(alice), Some(json!({"user_id": bob_id}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Only admins add members
    let (status, _) = call(server, "POST", &path, Some(bob), Some(json!({"user_id": bob_id}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_inbox_and_sent_history() {
    let relay = relay().await;
    let server = &relay.server;
    let (_, alice_tokens) = signup_and_login(server, "alice").await;
    let (bob_id, bob_tokens) = signup_and_login(server, "bob").await;
    let alice = alice_tokens["access_token"].as_str().unwrap();
    let bob = bob_tokens["access_token"].as_str().unwrap();

    let mut ws = warp::test::ws()
        .path("/ws/chat")
        .header("authorization", format!("Bearer {}", alice))
        .handshake(routes(server.clone()))
        .await
        .expect("handshake");
    common::send(&mut ws, json!({"type": "message", "recipient_id": bob_id, "message": "hello"})).await;
    common::next_of_type(&mut ws, "ack").await;

    let (status, sent) = call(server, "GET", "/messages/sent", Some(alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent.as_array().unwrap().len(), 1);

    let (status, inbox) = call(server, "GET", "/messages/inbox", Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    let inbox = inbox.as_array().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["message"], "hello");
    assert_eq!(inbox[0]["status"], "pending");
}

fn multipart(content_type: &str, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = "relay-boundary";
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"photo\"\r\nContent-Type: {ct}\r\n\r\n",
        b = boundary,
        ct = content_type
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}

async fn upload(server: &SharedChatServer, token: Option<&str>, content_type: &str, data: &[u8]) -> (StatusCode, Value) {
    let (header, body) = multipart(content_type, data);
    let mut request = warp::test::request()
        .method("POST")
        .path("/upload/image")
        .header("content-type", header)
        .body(body);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    let response = request.reply(&routes(server.clone())).await;
    let value = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (response.status(), value)
}

#[tokio::test]
async fn test_image_upload_and_serving() {
    let relay = relay().await;
    let server = &relay.server;
    let (_, tokens) = signup_and_login(server, "alice").await;
    let access = tokens["access_token"].as_str().unwrap();
    let png = b"\x89PNG\r\n\x1a\nnot-really-pixels";

    let (status, uploaded) = upload(server, Some(access), "image/png", png).await;
    assert_eq!(status, StatusCode::CREATED);
    let filename = uploaded["filename"].as_str().unwrap();
    assert!(filename.ends_with(".png"));
    assert_eq!(uploaded["url"], format!("/media/{}", filename));
    let on_disk = std::fs::read(server.config.media_dir.join(filename)).unwrap();
    assert_eq!(on_disk, png.to_vec());

    let response = warp::test::request()
        .method("GET")
        .path(uploaded["url"].as_str().unwrap())
        .reply(&routes(server.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&response.body()[..], &png[..]);

    let (status, body) = upload(server, Some(access), "image/gif", b"GIF89a").await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"], "unsupported_media_type");

    let (status, _) = upload(server, None, "image/png", png).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_send_over_http_waits_for_backlog() {
    let relay = relay().await;
    let server = &relay.server;
    let (alice_id, alice_tokens) = signup_and_login(server, "alice").await;
    let (bob_id, bob_tokens) = signup_and_login(server, "bob").await;
    let alice = alice_tokens["access_token"].as_str().unwrap();
    let bob = bob_tokens["access_token"].as_str().unwrap();

    let (status, stored) = call(
        server,
        "POST",
        "/messages/send",
        Some(alice),
        Some(json!({"recipient_id": bob_id, "message": "  see you  ", "image_url": "/media/x.png"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(stored["author_id"], alice_id);
    assert_eq!(stored["message"], "see you");
    assert_eq!(stored["status"], "pending");

    let (status, body) = call(
        server,
        "POST",
        "/messages/send",
        Some(alice),
        Some(json!({"recipient_id": bob_id, "message": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "empty_message");

    let (status, body) = call(
        server,
        "POST",
        "/messages/send",
        Some(alice),
        Some(json!({"recipient_id": 9999, "message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "unknown_recipient");

    // Delivered when bob connects
    let mut ws = common::connect(server, bob_id, bob).await;
    let pushed = common::next_of_type(&mut ws, "message").await;
    assert_eq!(pushed["message_id"], stored["id"]);
    assert_eq!(pushed["image_url"], "/media/x.png");
}
