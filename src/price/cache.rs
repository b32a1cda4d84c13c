use crate::error::Result;
use crate::models::{PriceHistory, PriceSnapshot};
use crate::redis::RedisClient;
use async_trait::async_trait;

pub const SPOT_PRICE_KEY: &str = "apiPrice";
pub const HISTORY_KEY: &str = "cgPrices";

/// Latest known token price plus the multi-day history blob.
///
/// Writers are the two refresh loops; everything else only reads. Each key is
/// last-writer-wins, and an absent key is reported as `None`, never as zero.
#[async_trait]
pub trait PriceCache: Send + Sync {
    async fn spot_price(&self) -> Result<Option<PriceSnapshot>>;
    async fn store_spot_price(&self, snapshot: &PriceSnapshot) -> Result<()>;
    async fn history(&self) -> Result<Option<PriceHistory>>;
    async fn store_history(&self, history: &PriceHistory) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisPriceCache {
    redis: RedisClient,
}

impl RedisPriceCache {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl PriceCache for RedisPriceCache {
    async fn spot_price(&self) -> Result<Option<PriceSnapshot>> {
        self.redis.get(SPOT_PRICE_KEY).await
    }

    async fn store_spot_price(&self, snapshot: &PriceSnapshot) -> Result<()> {
        self.redis.set(SPOT_PRICE_KEY, snapshot).await
    }

    async fn history(&self) -> Result<Option<PriceHistory>> {
        self.redis.get(HISTORY_KEY).await
    }

    async fn store_history(&self, history: &PriceHistory) -> Result<()> {
        self.redis.set(HISTORY_KEY, history).await
    }
}
