use std::sync::Arc;

use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::config::{CacheBackend, CacheSettings, Config};
use crate::middlewares::auth::JwtService;

pub mod answer_judge;
pub mod completion;
pub mod mock_interview_service;
pub mod points_ledger;
pub mod question_generator;
pub mod session_cache;
pub mod session_review;
pub mod session_store;
pub mod user_directory;

use completion::HttpCompletionClient;
use mock_interview_service::{InterviewBackends, InterviewSettings, MockInterviewService};
use points_ledger::MongoPointsLedger;
use session_cache::{InMemorySessionCache, RedisSessionCache, SessionCache};
use session_store::{MongoSessionStore, SessionStore};
use user_directory::MongoUserDirectory;

pub struct AppState {
    pub config: Config,
    pub jwt: JwtService,
    pub interviews: MockInterviewService,
    pub store: Arc<dyn SessionStore>,
    pub cache: Arc<dyn SessionCache>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        let store = MongoSessionStore::new(mongo.clone());
        store.ensure_indexes().await?;

        let cache = build_cache(&config.cache).await?;

        let backends = InterviewBackends {
            store: Arc::new(store),
            cache,
            completion: Arc::new(HttpCompletionClient::new(&config.ai)),
            ledger: Arc::new(MongoPointsLedger::new(&mongo)),
            users: Arc::new(MongoUserDirectory::new(&mongo)),
        };
        let settings = InterviewSettings {
            model: config.ai.model.clone(),
            ..InterviewSettings::default()
        };

        Ok(Self::from_backends(config, backends, settings))
    }

    /// Assembles the state from already constructed collaborators.
    pub fn from_backends(
        config: Config,
        backends: InterviewBackends,
        settings: InterviewSettings,
    ) -> Self {
        let store = backends.store.clone();
        let cache = backends.cache.clone();
        let jwt = JwtService::new(&config.jwt_secret);

        Self {
            config,
            jwt,
            interviews: MockInterviewService::new(backends, settings),
            store,
            cache,
        }
    }
}

async fn build_cache(settings: &CacheSettings) -> anyhow::Result<Arc<dyn SessionCache>> {
    match (settings.backend, settings.redis_uri.as_deref()) {
        (CacheBackend::Redis, Some(uri)) => {
            tracing::info!("Attempting to connect to Redis...");
            let client = redis::Client::open(uri)?;

            let redis = tokio::time::timeout(
                std::time::Duration::from_secs(30),
                ConnectionManager::new(client),
            )
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

            let mut conn = redis.clone();
            tokio::time::timeout(
                std::time::Duration::from_secs(5),
                redis::cmd("PING").query_async::<String>(&mut conn),
            )
            .await
            .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

            tracing::info!("Session cache backed by Redis");
            Ok(Arc::new(RedisSessionCache::new(redis, settings.ttl_seconds)))
        }
        (CacheBackend::Redis, None) => Err(anyhow::anyhow!(
            "redis session cache selected without a REDIS_URI"
        )),
        (CacheBackend::Memory, _) => {
            tracing::info!("Session cache kept in process memory");
            Ok(Arc::new(InMemorySessionCache::new()))
        }
    }
}
