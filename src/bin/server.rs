use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use rusty_relay::config::ServerConfig;
use rusty_relay::core::server::ChatServer;
use rusty_relay::handlers::routes;

#[tokio::main]
async fn main() {
    // Initialize env
    let env_loaded = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match env_loaded {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    }

    // Load config from the environment
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, broker={:?}",
        config.host, config.port, config.broker_backend
    );

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let server = match ChatServer::connect(config).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to initialize backends: {}", e);
            std::process::exit(1);
        }
    };

    let subscriber = match server.start_subscriber().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to subscribe to the broker: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };

    let routes = routes(server.clone());
    let tls = if server.config.enable_tls {
        server
            .config
            .tls_cert_path
            .clone()
            .zip(server.config.tls_key_path.clone())
    } else {
        None
    };

    match tls {
        Some((cert_path, key_path)) => {
            let (bound, serving) = warp::serve(routes)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .bind_with_graceful_shutdown(addr, shutdown);
            info!("Starting Rusty Relay server on wss://{}", bound);
            serving.await;
        }
        None => {
            let (bound, serving) = match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown) {
                Ok(bound) => bound,
                Err(e) => {
                    error!("Failed to bind {}: {}", addr, e);
                    std::process::exit(1);
                }
            };
            info!("Starting Rusty Relay server on ws://{}", bound);
            serving.await;
        }
    }

    subscriber.shutdown().await;
    info!("Rusty Relay server stopped");
}
