//! Chat server state shared by the gateway, the HTTP API and the subscriber loop

use std::sync::Arc;

use crate::auth::identity::{IdentityService, JwtIdentityService};
use crate::auth::token::TokenManager;
use crate::broker::{Broker, MemoryBroker, RedisBroker};
use crate::config::{BrokerBackend, ServerConfig};
use crate::core::delivery::DeliveryEngine;
use crate::core::presence::PresenceTracker;
use crate::core::rate_limiter::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};
use crate::core::registry::{ConnectionRegistry, SharedRegistry};
use crate::core::subscriber::{EventDispatcher, SubscriberHandle};
use crate::error::Result;
use crate::storage::{ChatStorage, MemoryStorage};

/// Everything one relay instance owns
pub struct ChatServer {
    pub config: ServerConfig,
    pub store: Arc<dyn ChatStorage>,
    pub broker: Arc<dyn Broker>,
    pub tokens: Arc<TokenManager>,
    pub identity: Arc<dyn IdentityService>,
    pub registry: SharedRegistry,
    pub delivery: DeliveryEngine,
    pub presence: PresenceTracker,
}

impl ChatServer {
    /// Wire a server from already-built backends
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ChatStorage>,
        broker: Arc<dyn Broker>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));
        let identity: Arc<dyn IdentityService> = Arc::new(JwtIdentityService::new(tokens.clone()));
        let registry: SharedRegistry = Arc::new(ConnectionRegistry::new());
        let limiter = Arc::new(RateLimiter::new(counters));

        let delivery = DeliveryEngine::new(
            store.clone(),
            broker.clone(),
            registry.clone(),
            limiter,
            config.message_rate_limit,
            config.group_message_rate_limit,
        );
        let presence = PresenceTracker::new(store.clone(), broker.clone());

        Self {
            config,
            store,
            broker,
            tokens,
            identity,
            registry,
            delivery,
            presence,
        }
    }

    /// Single-process server: in-memory store, broker and counters
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryBroker::new()),
            Arc::new(MemoryCounterStore::new()),
        )
    }

    /// Build the backends selected by the configuration
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        match config.broker_backend {
            BrokerBackend::Memory => {
                log::info!("Using in-process broker; fanout is limited to this instance");
                Ok(Self::in_memory(config))
            }
            BrokerBackend::Redis => {
                log::info!("Connecting to Redis at {}", config.redis_url);
                let broker = RedisBroker::connect(&config.redis_url).await?;
                let counters = RedisCounterStore::connect(broker.client()).await?;
                Ok(Self::new(
                    config,
                    Arc::new(MemoryStorage::new()),
                    Arc::new(broker),
                    Arc::new(counters),
                ))
            }
        }
    }

    /// Subscribe to the fanout channels and start this instance's subscriber loop
    pub async fn start_subscriber(&self) -> Result<SubscriberHandle> {
        let dispatcher = Arc::new(EventDispatcher::new(
            self.registry.clone(),
            self.store.clone(),
        ));
        SubscriberHandle::spawn(self.broker.clone(), dispatcher).await
    }
}

// Shared reference to the chat server
pub type SharedChatServer = Arc<ChatServer>;
