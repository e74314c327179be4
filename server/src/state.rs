use std::sync::Arc;

use tracing::info;

use crate::{
    config::{Config, StoreBackend},
    policy::{Policy, PolicyConfig},
    store::{DocStore, MemoryStore, RedisStore},
};

pub struct AppState {
    pub config: Config,
    pub policy: Policy,
    pub store: Arc<dyn DocStore>,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let store: Arc<dyn DocStore> = match config.store_backend {
            StoreBackend::Redis => {
                info!("Connecting to Redis at {}", config.redis_url);
                Arc::new(RedisStore::connect(&config.redis_url).await)
            }
            StoreBackend::Memory => {
                info!("Using in-process memory store");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_store(config, store)
    }

    pub fn with_store(config: Config, store: Arc<dyn DocStore>) -> Arc<Self> {
        let policy = Policy::new(PolicyConfig {
            fee_amount: config.fee_amount.clone(),
        });

        Arc::new(Self {
            config,
            policy,
            store,
        })
    }
}
