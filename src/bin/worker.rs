use anyhow::{Context, Result};
use price_watcher::config::FeederConfig;
use price_watcher::price::{self, HttpPriceSource, PriceCache, PriceSource, RedisPriceCache};
use price_watcher::redis::RedisClient;
use price_watcher::tasks::TaskSet;
use std::sync::Arc;
use tracing::info;

/// Price feeder only: keeps the cache warm for a separately deployed API.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = FeederConfig::from_env().context("failed to load feeder config")?;

    info!(
        spot_url = %config.token_price_url,
        spot_refresh_secs = config.spot_refresh.as_secs(),
        history_refresh_secs = config.history_refresh.as_secs(),
        "🎧 Starting price feeder"
    );

    let redis = RedisClient::new(&config.redis_url).await?;
    redis.ping().await?;

    let cache: Arc<dyn PriceCache> = Arc::new(RedisPriceCache::new(redis));
    let source: Arc<dyn PriceSource> = Arc::new(HttpPriceSource::new(
        config.token_price_url.clone(),
        config.history_url.clone(),
        config.http_timeout,
    )?);

    let mut tasks = TaskSet::new();
    {
        let (source, cache, period) = (source.clone(), cache.clone(), config.spot_refresh);
        tasks.spawn("spot-refresh", move |shutdown| {
            price::run_spot_refresh(source, cache, period, shutdown)
        });
    }
    tasks.spawn("history-refresh", move |shutdown| {
        price::run_history_refresh(source, cache, config.history_refresh, shutdown)
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Stopping price feeder");
    tasks.shutdown().await;
    Ok(())
}
