// Shared helpers for the integration tests
#![allow(dead_code)]

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use warp::test::WsClient;

use rusty_relay::config::ServerConfig;
use rusty_relay::core::server::{ChatServer, SharedChatServer};
use rusty_relay::core::subscriber::SubscriberHandle;
use rusty_relay::storage::NewUser;

pub const WAIT: Duration = Duration::from_secs(2);

pub struct TestRelay {
    pub server: SharedChatServer,
    pub subscriber: SubscriberHandle,
}

pub async fn relay() -> TestRelay {
    relay_with(ServerConfig::for_testing()).await
}

pub async fn relay_with(config: ServerConfig) -> TestRelay {
    let server = Arc::new(ChatServer::in_memory(config));
    let subscriber = server.start_subscriber().await.expect("subscriber starts");
    TestRelay { server, subscriber }
}

/// Create a user and return its id and an access token
pub async fn user(server: &SharedChatServer, name: &str) -> (i64, String) {
    let stored = server
        .store
        .create_user(NewUser {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password_hash: "unused".to_string(),
        })
        .await
        .expect("user created");
    let pair = server.tokens.issue_pair(stored.id).expect("tokens issued");
    (stored.id, pair.access_token)
}

/// Open a gateway session and wait until it is registered
pub async fn connect(server: &SharedChatServer, user_id: i64, token: &str) -> WsClient {
    let client = warp::test::ws()
        .path("/ws/chat")
        .header("authorization", format!("Bearer {}", token))
        .handshake(rusty_relay::handlers::routes(server.clone()))
        .await
        .expect("handshake");
    wait_until(|| async move { server.registry.is_online(user_id).await }).await;
    client
}

pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn send(client: &mut WsClient, frame: Value) {
    client.send_text(frame.to_string()).await;
}

/// Next JSON frame of the given type, skipping any others
pub async fn next_of_type(client: &mut WsClient, kind: &str) -> Value {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            let msg = client.recv().await.expect("socket open");
            let Ok(text) = msg.to_str() else {
                continue;
            };
            let value: Value = serde_json::from_str(text).expect("json frame");
            if value["type"] == kind {
                return value;
            }
        }
    })
    .await;
    found.unwrap_or_else(|_| panic!("no '{}' frame received", kind))
}

/// Assert no frame of the given type arrives within a short window
pub async fn assert_no_frame(client: &mut WsClient, kind: &str) {
    let result = tokio::time::timeout(Duration::from_millis(150), async {
        loop {
            let Ok(msg) = client.recv().await else {
                return None;
            };
            if let Ok(text) = msg.to_str() {
                let value: Value = serde_json::from_str(text).expect("json frame");
                if value["type"] == kind {
                    return Some(value);
                }
            }
        }
    })
    .await;
    if let Ok(Some(frame)) = result {
        panic!("unexpected '{}' frame: {}", kind, frame);
    }
}
