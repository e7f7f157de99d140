use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;
use warp::http::HeaderMap;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::constants::{CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, WS_CHAT_PATH, WS_PATH};
use crate::core::connection::Connection;
use crate::core::message_types::{ClientFrame, ServerFrame};
use crate::core::server::SharedChatServer;
use crate::error::Result;
use crate::handlers::auth::{authenticate_handshake, bearer_subprotocol, extract_token};
use crate::handlers::with_server;

/// `GET /ws/chat`: upgrade and hand the socket to a gateway session
pub fn ws_route(
    server: SharedChatServer,
) -> impl Filter<Extract = (Box<dyn Reply>,), Error = Rejection> + Clone {
    warp::path(WS_PATH)
        .and(warp::path(WS_CHAT_PATH))
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::header::headers_cloned())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_server(server))
        .map(
            |ws: Ws, headers: HeaderMap, query: HashMap<String, String>, server: SharedChatServer| {
                let token = extract_token(&headers, &query);
                let protocol = bearer_subprotocol(&headers);
                let reply = ws.on_upgrade(move |socket| handle_ws_client(socket, server, token));
                match protocol {
                    Some(protocol) => Box::new(warp::reply::with_header(
                        reply,
                        "sec-websocket-protocol",
                        protocol,
                    )) as Box<dyn Reply>,
                    None => Box::new(reply) as Box<dyn Reply>,
                }
            },
        )
}

// Handle a WebSocket connection from upgrade to teardown
pub async fn handle_ws_client(ws: WebSocket, server: SharedChatServer, token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Forward frames from our channel to the WebSocket until a close frame goes out
    tokio::task::spawn(async move {
        let mut rx = rx;
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let user = match authenticate_handshake(token, &server).await {
        Ok(user) => user,
        Err(e) => {
            warn!("Rejected WebSocket handshake: {}", e);
            let _ = tx.send(Message::close_with(CLOSE_POLICY_VIOLATION, "unauthorized"));
            return;
        }
    };

    server.presence.mark_online(user.id).await;
    let connection = Connection::new(user.id, tx);
    if let Some(previous) = server.registry.register(connection.clone()).await {
        info!(
            "User {} connected again; closing connection {}",
            user.id, previous.id
        );
        previous.close(CLOSE_NORMAL, "superseded");
    }
    let session = SessionGuard::new(server.clone(), connection.clone());
    info!("User {} ({}) connected as {}", user.id, user.username, connection.id);

    server.presence.announce_online(user.id).await;
    if let Err(e) = server.delivery.replay_backlog(&connection).await {
        warn!("Backlog replay for user {} interrupted: {}", user.id, e);
    }

    // Frames are processed one at a time, in arrival order
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) if msg.is_text() => {
                let text = msg.to_str().unwrap_or_default();
                process_frame(&server, &connection, text).await;
            }
            Ok(msg) if msg.is_close() => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket error for user {}: {}", user.id, e);
                break;
            }
        }
    }

    session.disconnect().await;
}

// Decode one text frame and route it to the delivery engine
async fn process_frame(server: &SharedChatServer, connection: &Connection, text: &str) {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Rejected frame from user {}: {}", connection.user_id, e);
            connection.send_json(&ServerFrame::error(&e));
            return;
        }
    };

    let user_id = connection.user_id;
    let kind = frame.kind();
    match frame {
        ClientFrame::Message(frame) => {
            reply(connection, kind, server.delivery.send(user_id, frame).await)
        }
        ClientFrame::GroupMessage(frame) => {
            reply(connection, kind, server.delivery.send_group(user_id, frame).await)
        }
        ClientFrame::Read(frame) => {
            report(connection, kind, server.delivery.mark_read(user_id, frame).await)
        }
        ClientFrame::GroupRead(frame) => {
            report(connection, kind, server.delivery.group_read(user_id, frame).await)
        }
    }
}

// Send operations always answer: an ack or an error frame
fn reply(connection: &Connection, kind: &str, result: Result<ServerFrame>) {
    let frame = result.unwrap_or_else(|e| {
        log_failure(connection, kind, &e);
        ServerFrame::error(&e)
    });
    connection.send_json(&frame);
}

// Read operations only answer when the client did something wrong
fn report(connection: &Connection, kind: &str, result: Result<()>) {
    if let Err(e) = result {
        log_failure(connection, kind, &e);
        if e.is_client_facing() {
            connection.send_json(&ServerFrame::error(&e));
        }
    }
}

fn log_failure(connection: &Connection, kind: &str, e: &crate::error::RustyRelayError) {
    if e.is_client_facing() {
        debug!("{} from user {} rejected: {}", kind, connection.user_id, e);
    } else {
        error!("{} from user {} failed: {}", kind, connection.user_id, e);
    }
}

/// Runs the disconnect sequence exactly once, even if the session task is
/// cancelled before reaching the end of its loop.
struct SessionGuard {
    inner: Option<(SharedChatServer, Connection)>,
}

impl SessionGuard {
    fn new(server: SharedChatServer, connection: Connection) -> Self {
        Self {
            inner: Some((server, connection)),
        }
    }

    async fn disconnect(mut self) {
        if let Some((server, connection)) = self.inner.take() {
            teardown(server, connection).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some((server, connection)) = self.inner.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(teardown(server, connection));
                }
                Err(_) => error!(
                    "No runtime to tear down connection {} of user {}",
                    connection.id, connection.user_id
                ),
            }
        }
    }
}

// A connection superseded by a newer one leaves presence alone. One that was
// already evicted after a failed push still goes offline here.
async fn teardown(server: SharedChatServer, connection: Connection) {
    if server
        .registry
        .release(connection.user_id, &connection.id)
        .await
    {
        server.presence.go_offline(connection.user_id).await;
        info!(
            "User {} disconnected after {:?}",
            connection.user_id,
            connection.connection_duration()
        );
    } else {
        debug!(
            "Connection {} of user {} was superseded; presence unchanged",
            connection.id, connection.user_id
        );
    }
}
