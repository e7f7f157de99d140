//! Request handlers for different server endpoints

pub mod api;
pub mod auth;
pub mod uploads;
pub mod websocket;

use std::convert::Infallible;
use warp::{Filter, Rejection, Reply};

use crate::core::server::SharedChatServer;

// Re-export the entry points
pub use api::api_routes;
pub use websocket::{handle_ws_client, ws_route};

// Helper function to include the server state in a request
pub fn with_server(
    server: SharedChatServer,
) -> impl Filter<Extract = (SharedChatServer,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

/// Every route the relay serves
pub fn routes(
    server: SharedChatServer,
) -> impl Filter<Extract = (Box<dyn Reply>,), Error = Rejection> + Clone {
    ws_route(server.clone()).or(api_routes(server)).unify()
}
