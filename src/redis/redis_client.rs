use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use tracing::{info, warn};

#[derive(Clone)]
pub struct RedisClient {
    pub connection: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;

        let connection = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection")?;

        info!("Successfully connected to Redis");

        Ok(Self { connection })
    }

    /// Stores `value` as JSON under `key`, replacing whatever was there.
    pub async fn set<T: serde::Serialize>(&self, key: &str, value: &T) -> crate::error::Result<()> {
        let json = serde_json::to_string(value)?;
        let mut connection = self.connection.clone();

        match connection.set::<_, _, ()>(key, json).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    warn!(key, "Redis connection lost, manager will reconnect");
                }
                Err(e.into())
            }
        }
    }

    /// `Ok(None)` when the key has never been written.
    pub async fn get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> crate::error::Result<Option<T>> {
        let mut connection = self.connection.clone();
        let result: RedisResult<Option<String>> = connection.get(key).await;

        match result? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }
}
