//! Shared application state, constructed once at start-up and passed into the router.

use std::sync::Arc;

use crate::auth::SessionRegistry;
use crate::config::Config;
use crate::counter_store::{CounterStore, CounterStoreGateway};
use crate::data_store::DataStore;
use crate::decision::DecisionEngine;
use crate::policy_cache::PolicyCache;
use crate::policy_store::{PolicyStore, PolicyStoreGateway};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub policy_store: Arc<dyn PolicyStoreGateway>,
    pub decision_engine: Arc<DecisionEngine>,
    pub data_store: Arc<DataStore>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let policy_store: Arc<dyn PolicyStoreGateway> = Arc::new(
            PolicyStore::connect(&config.policy_database_url, config.db_connection_timeout).await?,
        );
        let data_store =
            Arc::new(DataStore::connect(&config.database_url, config.db_connection_timeout).await?);
        let counter_store: Arc<dyn CounterStoreGateway> = Arc::new(CounterStore::connect(
            &config.redis_url,
            config.db_connection_timeout,
        )?);
        let policy_cache = Arc::new(PolicyCache::new());
        let sessions = Arc::new(SessionRegistry::new());

        let decision_engine = Arc::new(DecisionEngine::new(
            policy_store.clone(),
            counter_store,
            policy_cache,
            config.clone(),
        ));

        Ok(Self {
            config,
            sessions,
            policy_store,
            decision_engine,
            data_store,
        })
    }
}
