//! Best-effort mirror of active sessions.
//!
//! The cache accelerates the submit-answer path and covers for the session
//! store when it is unavailable. It is advisory: the store wins on every
//! read, and the only synchronization point is eviction at completion.

use std::collections::{hash_map::Entry, HashMap};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

use crate::metrics::track_cache_operation;
use crate::models::MockSession;

const CACHE_KEY_PREFIX: &str = "mock_session:";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cached session could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn set(&self, token: &str, session: &MockSession) -> Result<(), CacheError>;
    /// Writes only when no entry exists. Returns whether the write happened.
    async fn set_if_absent(&self, token: &str, session: &MockSession) -> Result<bool, CacheError>;
    async fn get(&self, token: &str) -> Result<Option<MockSession>, CacheError>;
    async fn delete(&self, token: &str) -> Result<(), CacheError>;
    async fn contains(&self, token: &str) -> Result<bool, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Process-local cache. Lost on restart; not shared between instances.
#[derive(Default)]
pub struct InMemorySessionCache {
    entries: RwLock<HashMap<String, MockSession>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn set(&self, token: &str, session: &MockSession) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(token.to_string(), session.clone());
        Ok(())
    }

    async fn set_if_absent(&self, token: &str, session: &MockSession) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        match entries.entry(token.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, token: &str) -> Result<Option<MockSession>, CacheError> {
        Ok(self.entries.read().await.get(token).cloned())
    }

    async fn delete(&self, token: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(token);
        Ok(())
    }

    async fn contains(&self, token: &str) -> Result<bool, CacheError> {
        Ok(self.entries.read().await.contains_key(token))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Networked cache for deployments running several API instances.
pub struct RedisSessionCache {
    redis: ConnectionManager,
    ttl_seconds: Option<u64>,
}

impl RedisSessionCache {
    pub fn new(redis: ConnectionManager, ttl_seconds: Option<u64>) -> Self {
        Self { redis, ttl_seconds }
    }

    fn key(token: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, token)
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn set(&self, token: &str, session: &MockSession) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let session_json = serde_json::to_string(session)?;
        let key = Self::key(token);

        track_cache_operation("set", async {
            match self.ttl_seconds {
                Some(ttl) => {
                    redis::cmd("SETEX")
                        .arg(&key)
                        .arg(ttl)
                        .arg(&session_json)
                        .query_async::<()>(&mut conn)
                        .await?
                }
                None => {
                    redis::cmd("SET")
                        .arg(&key)
                        .arg(&session_json)
                        .query_async::<()>(&mut conn)
                        .await?
                }
            }
            Ok::<(), CacheError>(())
        })
        .await
    }

    async fn set_if_absent(&self, token: &str, session: &MockSession) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        let session_json = serde_json::to_string(session)?;
        let key = Self::key(token);

        track_cache_operation("set_nx", async {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(&session_json).arg("NX");
            if let Some(ttl) = self.ttl_seconds {
                cmd.arg("EX").arg(ttl);
            }
            // nil reply when the key already exists
            let reply: Option<String> = cmd.query_async(&mut conn).await?;
            Ok::<bool, CacheError>(reply.is_some())
        })
        .await
    }

    async fn get(&self, token: &str) -> Result<Option<MockSession>, CacheError> {
        let mut conn = self.redis.clone();
        let key = Self::key(token);

        let cached: Option<String> = track_cache_operation("get", async {
            let value: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            Ok::<_, CacheError>(value)
        })
        .await?;

        match cached {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, token: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let key = Self::key(token);

        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<()>(&mut conn)
                .await?;
            Ok::<(), CacheError>(())
        })
        .await
    }

    async fn contains(&self, token: &str) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        let key = Self::key(token);

        track_cache_operation("exists", async {
            let exists: bool = redis::cmd("EXISTS").arg(&key).query_async(&mut conn).await?;
            Ok::<bool, CacheError>(exists)
        })
        .await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_millis(500),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| CacheError::Backend("Redis timeout after 500ms".to_string()))??;
        Ok(())
    }
}
